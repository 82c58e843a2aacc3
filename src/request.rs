use crate::error::RequestError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

pub(crate) const OCSP_REQUEST_MEDIA_TYPE: &str = "application/ocsp-request";

#[derive(Debug, Clone, PartialEq)]
pub enum RequestMethod {
    Get,
    Post,
    Other(String),
}

/// Transport-independent view of an inbound HTTP exchange.
#[derive(Debug)]
pub struct InboundRequest<'a> {
    pub method: RequestMethod,
    pub content_type: Option<&'a str>,
    pub body: &'a [u8],
    /// Percent-decoded path, including the leading `/`.
    pub path: &'a str,
}

fn is_ocsp_request_type(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .is_some_and(|media| media.trim().eq_ignore_ascii_case(OCSP_REQUEST_MEDIA_TYPE))
}

/// Recovers the DER encoded OCSP request carried by `request`.
///
/// POST bodies are taken verbatim, GET requests carry the request base64
/// encoded after the route root. In strict mode the declared content type
/// must be `application/ocsp-request` whatever the method.
pub fn extract_request_bytes(
    request: &InboundRequest<'_>,
    strict: bool,
) -> Result<Vec<u8>, RequestError> {
    if strict && !request.content_type.is_some_and(is_ocsp_request_type) {
        return Err(RequestError::ContentType(
            request.content_type.map(str::to_string),
        ));
    }
    match &request.method {
        RequestMethod::Post => Ok(request.body.to_vec()),
        RequestMethod::Get => {
            let encoded = request.path.strip_prefix('/').unwrap_or(request.path);
            STANDARD
                .decode(encoded.trim())
                .map_err(|e| RequestError::InvalidEncoding(e.to_string()))
        }
        RequestMethod::Other(method) => Err(RequestError::UnsupportedMethod(method.clone())),
    }
}
