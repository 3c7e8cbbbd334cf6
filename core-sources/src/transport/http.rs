//! Redirect-following GET on top of the single-hop [`HttpClient`] bridge.

use crate::error::{HttpFailure, Result, SourceError};
use crate::spec::HttpSourceSpec;
use bridge_traits::{HttpClient, HttpRequest, HttpResponse};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// Response of the last hop plus the spec it was fetched from.
pub struct Fetched {
    /// Final location after redirects, used to resolve relative links.
    pub spec: HttpSourceSpec,
    pub response: HttpResponse,
}

/// GET with manual redirect handling.
///
/// Each hop decides whether credentials travel to the next location, so a
/// redirect to another origin never receives the `Authorization` header.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Arc<dyn HttpClient>,
    max_redirects: u8,
}

impl HttpFetcher {
    pub fn new(client: Arc<dyn HttpClient>, max_redirects: u8) -> Self {
        Self {
            client,
            max_redirects,
        }
    }

    #[instrument(skip(self, spec, cancel), fields(source_id = %spec.source_id()))]
    pub async fn get(&self, spec: &HttpSourceSpec, cancel: &CancellationToken) -> Result<Fetched> {
        let mut current = spec.clone();

        for hop in 0..=self.max_redirects {
            let mut request = HttpRequest::get(current.source_id());
            if let Some(encoded) = current.basic_auth() {
                request = request.basic_auth(encoded);
            }

            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SourceError::Cancelled),
                res = self.client.send(request) => res?,
            };

            if response.is_redirect() {
                let status = response.status;
                if hop == self.max_redirects {
                    return Err(SourceError::Http {
                        failure: HttpFailure::TooManyRedirects,
                    });
                }
                let location = response
                    .header("location")
                    .filter(|l| !l.trim().is_empty())
                    .ok_or(SourceError::Http {
                        failure: HttpFailure::Redirect { status },
                    })?;
                let next = current.resolve(location).map_err(|_| SourceError::Http {
                    failure: HttpFailure::Redirect { status },
                })?;
                debug!(
                    status,
                    hop = hop + 1,
                    to = %next.source_id(),
                    keeps_credentials = next.has_credentials(),
                    "Following redirect"
                );
                current = next;
                continue;
            }

            if response.is_success() {
                return Ok(Fetched {
                    spec: current,
                    response,
                });
            }

            return Err(SourceError::Http {
                failure: HttpFailure::Status {
                    status: response.status,
                },
            });
        }

        Err(SourceError::Http {
            failure: HttpFailure::TooManyRedirects,
        })
    }
}
