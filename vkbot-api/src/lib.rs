//! # vkbot-api
//!
//! HTTP implementation of [`vkbot_core::RemoteApi`]: form-encoded method calls with envelope
//! decoding and error classification, long-poll requests, and a fixed delay after every call
//! to stay under the platform's requests-per-second ceiling.

mod client;
mod config;
mod wire;

pub use client::{Identity, VkApiClient};
pub use config::{
    ApiConfig, DEFAULT_API_URL, DEFAULT_API_VERSION, DEFAULT_LP_VERSION, DEFAULT_REQUEST_INTERVAL,
};
pub use wire::{decode_envelope, GroupInfo, UserInfo};
