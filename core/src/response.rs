use std::marker::PhantomData;

use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::error::{HarborError, Result};

/// Capability every endpoint response exposes to the error normalizer.
///
/// `status_code` is `None` when no transport response was captured; such
/// values are treated as successful.
pub trait RawResponse {
    fn status_code(&self) -> Option<u16>;

    /// Raw body bytes, `None` when the body could not be read.
    fn raw_body(&self) -> Option<&[u8]>;
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

/// Classifies a response into an error, or `Ok(())` when it is not one.
pub fn error_from_response<R: RawResponse + ?Sized>(response: &R) -> Result<()> {
    let Some(status) = response.status_code() else {
        return Ok(());
    };
    if status < 400 {
        return Ok(());
    }

    let message = match response.raw_body() {
        Some(body) => match serde_json::from_slice::<ErrorBody>(body) {
            Ok(decoded) => decoded.message.unwrap_or_default(),
            Err(_) => String::from_utf8_lossy(body).into_owned(),
        },
        None => "could not read response body".to_string(),
    };

    Err(match status {
        401 => HarborError::Unauthorized,
        403 => HarborError::Forbidden,
        _ if !message.is_empty() => HarborError::Api { status, message },
        _ => HarborError::UnknownApi,
    })
}

/// Status and body of one API call, typed by the success payload it carries.
#[derive(Debug, Clone)]
pub struct ApiResponse<T> {
    status: u16,
    body: Vec<u8>,
    _payload: PhantomData<fn() -> T>,
}

impl<T> ApiResponse<T> {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
            _payload: PhantomData,
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

impl<T: DeserializeOwned> ApiResponse<T> {
    /// Normalizes error statuses, then decodes the success payload.
    pub fn into_result(self) -> Result<T> {
        error_from_response(&self)?;
        serde_json::from_slice(&self.body).map_err(|err| HarborError::MalformedResponse {
            status: self.status,
            detail: err.to_string(),
        })
    }
}

impl<T> RawResponse for ApiResponse<T> {
    fn status_code(&self) -> Option<u16> {
        Some(self.status)
    }

    fn raw_body(&self) -> Option<&[u8]> {
        Some(&self.body)
    }
}
