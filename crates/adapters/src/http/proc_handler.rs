//! Textual table exports, readable whole or by byte range.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::header;
use serde::Deserialize;

use super::state::AppState;

const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Optional `(offset, length)` window into a report.
#[derive(Debug, Default, Deserialize)]
pub struct ReadRange {
    pub offset: Option<usize>,
    pub length: Option<usize>,
}

impl ReadRange {
    fn window(&self) -> (usize, usize) {
        (self.offset.unwrap_or(0), self.length.unwrap_or(usize::MAX))
    }
}

type TextResponse = ([(header::HeaderName, &'static str); 1], Vec<u8>);

/// `GET /proc/ip_vs`: the virtual server table.
pub async fn ip_vs(State(state): State<Arc<AppState>>, Query(range): Query<ReadRange>) -> TextResponse {
    let (offset, length) = range.window();
    let body = state.control.read_ip_vs(offset, length);
    ([(header::CONTENT_TYPE, TEXT_CONTENT_TYPE)], body)
}

/// `GET /proc/ip_vs_stats`: the global counters and rates.
pub async fn ip_vs_stats(
    State(state): State<Arc<AppState>>,
    Query(range): Query<ReadRange>,
) -> TextResponse {
    let (offset, length) = range.window();
    let body = state.control.read_stats(offset, length);
    ([(header::CONTENT_TYPE, TEXT_CONTENT_TYPE)], body)
}
