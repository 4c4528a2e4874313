//! # pmoserver - Serveur web haut niveau basé sur Axum
//!
//! Abstraction du serveur HTTP de PMORadio :
//!
//! - 🚀 **API de haut niveau** : routes JSON, handlers avec état, sous-routers
//! - 📡 **Journal en direct** : les logs `tracing` servis en SSE (`/log-sse`)
//! - 📚 **Documentation OpenAPI** : Swagger UI par API montée
//! - ⚡ **Arrêt gracieux** : Ctrl+C ou jeton d'annulation
//!
//! ## Modules
//!
//! - [`server`] : le serveur et son builder
//! - [`logs`] : buffer de logs, layer `tracing`, routes SSE et `log_setup`
//!
//! ## Exemple
//!
//! ```rust,no_run
//! use pmoserver::{ServerBuilder, logs::LoggingOptions};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut server = ServerBuilder::new("MyServer", "localhost", 8080).build();
//!     server.init_logging(LoggingOptions::default()).await;
//!
//!     server.add_route("/api/status", || async {
//!         serde_json::json!({"status": "ok"})
//!     }).await;
//!
//!     server.start().await?;
//!     server.wait().await;
//!     Ok(())
//! }
//! ```

pub mod logs;
pub mod server;

pub use logs::{LogState, LoggingOptions, SseLayer, log_dump, log_sse};
pub use server::{Server, ServerBuilder, ServerInfo};
