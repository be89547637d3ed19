// Library root
// -----------
// The binary (`main.rs`) only parses arguments, sets up logging and calls
// `app::run`. Everything else lives here so it can be tested.
//
// Module responsibilities:
// - `cli`: argument parsing and the immutable `UploadRequest`.
// - `config`: environment-driven settings (file locations, chunking, retries).
// - `credentials`: the OAuth token bundle and its on-disk store.
// - `oauth`: client secrets, token refresh and the browser consent flow.
// - `api`: blocking HTTP calls of the resumable upload protocol.
// - `upload`: the chunk loop with progress and retry.
// - `ui`: terminal output and prompts.
// - `app`: wires the above together for one run.
pub mod api;
pub mod app;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod error;
pub mod oauth;
pub mod ui;
pub mod upload;
