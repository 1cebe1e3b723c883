pub mod api;

pub use api::{
    fetch_existing_ids,
    fetch_fields_dict,
    get_note_types,
    http_client,
    invoke,
    invoke_request,
    parse_multi_reply,
    parse_multi_result,
    parse_reply,
    wait_awake,
    Request,
};
