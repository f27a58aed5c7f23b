//! Actor-based scheduling and result processing
//!
//! Each actor runs as an independent tokio task and is driven through a cloneable handle.
//!
//! ## Architecture Overview
//!
//! ```text
//!   WebsiteMonitor-1 ... WebsiteMonitor-N      (one per active website, timer driven)
//!          │                    │
//!          └──── MonitorExecutor::monitor ────┐
//!                                             │ offer (lossy)
//!                                      ┌──────▼──────┐
//!                                      │ ResultQueue │ (bounded MPMC)
//!                                      └──────┬──────┘
//!                                             │ poll
//!                          QueueConsumer-1 ... QueueConsumer-M
//!                                │                    │
//!                       Broadcaster::publish   AlertEvaluator::evaluate_result
//! ```
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: monitors take control messages over an mpsc channel
//! 2. **Request/Response**: oneshot channels carry the result of an on-demand check
//! 3. **Shutdown**: consumers watch a shared stop signal

pub mod consumer;
pub mod messages;
pub mod website_monitor;
