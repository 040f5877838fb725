pub mod http_json;

pub use http_json::HttpJsonRunner;
