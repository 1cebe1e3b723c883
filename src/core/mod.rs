pub mod errors;
pub mod models;

pub use errors::MdankiError;
pub use models::{ FieldsDict, FrozenFieldsDict, NoteOptions, NoteRecord, ParsedNote };
