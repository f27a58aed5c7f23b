//! API shared state

use std::sync::Arc;

use crate::engine::Engine;

/// Shared state passed to all API handlers
#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<Engine>,

    /// Payloads buffered per websocket client before sends start to wait
    pub subscriber_buffer: usize,
}

impl ApiState {
    pub fn new(engine: Arc<Engine>, subscriber_buffer: usize) -> Self {
        Self {
            engine,
            subscriber_buffer: subscriber_buffer.max(1),
        }
    }
}
