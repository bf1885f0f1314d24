//! Container boundary: the request and response shapes filters operate on.
//!
//! The embedding HTTP server converts its native request into a
//! [`FilterRequest`] (or uses [`FilterRequest::from_http`]), runs the filter,
//! and writes the resulting [`FilterResponse`] back out.

mod request;
mod response;

pub use request::{parse_cookies, parse_query_params, FilterRequest, RequestAttribute, PRINCIPAL_ATTRIBUTE};
pub use response::{expired_cookie, secure_cookie, FilterResponse};
