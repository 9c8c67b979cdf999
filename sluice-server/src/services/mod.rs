//! Background services and the HTTP server.

mod ingest;
mod server;
mod status;
mod upstream;

pub use self::ingest::*;
pub use self::server::*;
pub use self::status::*;
pub use self::upstream::*;
