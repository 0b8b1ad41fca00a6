pub mod error;
pub mod http;
pub mod notify;
pub mod providers;
pub mod telemetry;
pub mod validator;
