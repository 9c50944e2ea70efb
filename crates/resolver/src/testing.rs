//! In-memory fetcher for unit tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::FetchError;
use crate::fetch::{FetchRequest, FetchResponse, Fetcher};

enum Route {
    Respond { status: u16, body: String, delay: Duration },
    Timeout,
    Panic,
}

/// Serves canned responses by exact URL; unknown URLs get a 404.
#[derive(Default)]
pub(crate) struct RouteFetcher {
    routes: HashMap<String, Route>,
    log: Mutex<Vec<FetchRequest>>,
}

impl RouteFetcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn page(self, url: &str, body: &str) -> Self {
        self.status(url, 200, body)
    }

    pub(crate) fn status(mut self, url: &str, status: u16, body: &str) -> Self {
        self.routes.insert(
            url.to_string(),
            Route::Respond {
                status,
                body: body.to_string(),
                delay: Duration::ZERO,
            },
        );
        self
    }

    pub(crate) fn slow(mut self, url: &str, delay: Duration, body: &str) -> Self {
        self.routes.insert(
            url.to_string(),
            Route::Respond {
                status: 200,
                body: body.to_string(),
                delay,
            },
        );
        self
    }

    pub(crate) fn timeout(mut self, url: &str) -> Self {
        self.routes.insert(url.to_string(), Route::Timeout);
        self
    }

    pub(crate) fn panic(mut self, url: &str) -> Self {
        self.routes.insert(url.to_string(), Route::Panic);
        self
    }

    pub(crate) fn requests(&self) -> Vec<FetchRequest> {
        self.log.lock().unwrap().clone()
    }

    pub(crate) fn calls_to(&self, url: &str) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|request| request.url == url)
            .count()
    }
}

#[async_trait]
impl Fetcher for RouteFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        self.log.lock().unwrap().push(request.clone());

        match self.routes.get(&request.url) {
            Some(Route::Respond {
                status,
                body,
                delay,
            }) => {
                if !delay.is_zero() {
                    tokio::time::sleep(*delay).await;
                }
                Ok(FetchResponse {
                    status: *status,
                    final_url: request.url.clone(),
                    body: body.clone(),
                })
            }
            Some(Route::Timeout) => Err(FetchError::Timeout),
            Some(Route::Panic) => panic!("route configured to panic: {}", request.url),
            None => Ok(FetchResponse {
                status: 404,
                final_url: request.url.clone(),
                body: String::new(),
            }),
        }
    }
}
