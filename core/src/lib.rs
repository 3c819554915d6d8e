pub mod error;
pub mod pagination;
pub mod resources;
pub mod response;

pub use error::{ErrorKind, HarborError, Result};
pub use pagination::{Cursor, PAGE_SIZE, fetch_all};
pub use response::{ApiResponse, RawResponse, error_from_response};
