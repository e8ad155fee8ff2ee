//! Analysis relay: asynchronous repository analysis on top of a remote
//! code-intelligence engine.
//!
//! ## Overview
//!
//! A client submits a repository and a question. The relay asks the remote
//! engine to parse the repository, records a job in a durable SQLite queue
//! and answers immediately. Workers then wait for the parse to finish, ask
//! the engine's agent the question, normalize the reply into a structured
//! result and push every step to WebSocket subscribers of the project.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Client  │ ───────> │  server.rs  (axum Router, start_server)          │
//! │          │ <─────── │    ├─ api.rs  (route handlers, AppState)         │
//! └──────────┘ WebSocket│    └─ ws.rs   (/ws/{project_id}, keepalive)      │
//!                       │         │                                        │
//!                       │         │ QueueHandle::submit()                  │
//!                       │         v                                        │
//!                       │  db.rs  (JobQueueDb, QueueHandle, RetryPolicy)   │
//!                       │         │                                        │
//!                       │         │ QueueHandle::dequeue()                 │
//!                       │         v                                        │
//!                       │  pipeline.rs  (WorkerPool, PoolHandle)           │
//!                       │         ├─ poller.rs    (poll_until_ready)       │
//!                       │         ├─ normalize.rs (agent reply → result)   │
//!                       │         └─ hub.rs       (NotificationHub)        │
//!                       └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Supporting Modules
//!
//! | Module     | Responsibility                                            |
//! |------------|-----------------------------------------------------------|
//! | `provider` | `AnalysisProvider` trait + reqwest-backed HTTP client     |
//! | `metrics`  | `PipelineMetrics` atomic counters behind `/api/metrics`   |

pub mod api;
pub mod db;
pub mod hub;
pub mod metrics;
pub mod normalize;
pub mod pipeline;
pub mod poller;
pub mod provider;
pub mod server;
pub mod ws;

#[cfg(test)]
pub(crate) mod testing;
