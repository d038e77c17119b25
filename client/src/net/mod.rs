pub mod transport;

pub use transport::{ClientTransport, ConnectionQuality, DisconnectReason, TransportMetrics};
