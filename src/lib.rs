/// Assimilation Bot Library
///
/// Polls a social platform for recent posts matching configured hashtags and
/// accounts, skips posts already handled or written by the bot itself, and
/// selects the most liked and most retweeted candidates for a language-model
/// response.

pub mod assimilation;
pub mod config;
pub mod error;
pub mod llm;
pub mod scheduler;
pub mod shutdown;
pub mod social;
pub mod store;
