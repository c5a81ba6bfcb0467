pub mod bucket_store;
pub mod http_client;
pub mod user_agent;

pub use bucket_store::BucketStore;
pub use http_client::ReqwestUpstream;
