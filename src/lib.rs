//! # a3s-wallet
//!
//! Client-side controller for an external wallet agent.
//!
//! ## Overview
//!
//! `a3s-wallet` lets an application discover a wallet agent, request
//! connection approval for a contract, submit transactions and route each
//! status back to the request that caused it, and run a challenge/response
//! authentication. The agent is reached over a pluggable message transport
//! (an in-page extension) or through a separately opened popup window.
//!
//! ## Quick Start
//!
//! ```rust
//! use a3s_wallet::{ConnectionRequest, NetworkType, WalletController};
//! use a3s_wallet::transport::memory::MemoryTransport;
//!
//! # async fn example() -> a3s_wallet::Result<()> {
//! let request = ConnectionRequest::new("Swap Pad", "con_swap", NetworkType::Main)?;
//!
//! let controller = WalletController::builder(MemoryTransport::default())
//!     .connection_request(request)
//!     .build()?;
//! controller.start().await?;
//!
//! controller.events().on("newInfo", |status| {
//!     println!("agent status: {}", status);
//! });
//!
//! if controller.check_installed().await? {
//!     let status = controller.send_connection(None).await?;
//!     println!("connected: {}", status);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Transports
//!
//! - **memory**: In-process transport for tests and embedding
//! - **popup**: Cross-window relay to the web-hosted wallet
//!
//! ## Architecture
//!
//! - **AgentTransport** trait: publish/subscribe to the agent's topics
//! - **WalletController**: discovery, connection, transactions, auth
//! - **AgentState**: local view reconciled from status messages
//! - **PendingRequests**: uid-keyed one-shot transaction callbacks
//! - **EventEmitter**: local listeners for `newInfo`, `txStatus`, `authResult`

pub mod auth;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod inbox;
pub mod popup;
pub mod registry;
pub mod state;
pub mod transport;
pub mod types;
pub mod uid;

// Re-export core types
pub use auth::build_challenge_message;
pub use config::{AgentMode, Topics, WalletConfig};
pub use controller::{AuthCallback, WalletController, WalletControllerBuilder};
pub use error::{Result, WalletError};
pub use events::{topics, EventEmitter, ListenerId};
pub use popup::{
    ListenerGuard, PopupDelivery, PopupRelay, PopupTicket, PopupWindow, WindowHost, WindowMessage,
};
pub use registry::{Dispatch, PendingRequests, TxCallback};
pub use state::{AgentState, ApprovalLayout, ApprovalRecord};
pub use transport::{AgentMessage, AgentTransport, Subscription};
pub use types::{
    AuthRequest, Charm, ConnectionRequest, NetworkType, PreApproval, StatusMessage,
    TransactionRequest, TxData, TxStatusData,
};
pub use uid::{CounterUid, TimestampUid, UidGenerator, UuidUid};

// Re-export transports for convenience
pub use transport::memory::{MemoryConfig, MemoryTransport};
