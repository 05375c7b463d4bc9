pub mod error;
pub mod path;
pub mod ser;
pub mod value;

pub use error::{Result, TrackError};
pub use ser::{to_doc_value, to_document};
pub use value::{DocValue, Document, IntegerWidth};
