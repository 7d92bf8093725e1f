// Library root
// -----------
// This crate exposes the library surface of the `assistant` CLI. The binary
// (`main.rs`) parses arguments, sets up logging and hands off to `ui`.
//
// Module responsibilities:
// - `walker`, `archive`, `artifact`: turn a project directory into a
//   sealed zip package in a temp file.
// - `api`: HTTP calls to the assistant API gateway (upload, template,
//   token verification, organisations).
// - `deploy`: sequences packaging and upload as explicit states.
// - `token`, `config`: local state and runtime settings.
// - `scaffold`, `cli`, `ui`: the `init` command and the console front end.
pub mod api;
pub mod archive;
pub mod artifact;
pub mod cli;
pub mod config;
pub mod deploy;
pub mod error;
pub mod scaffold;
pub mod token;
pub mod ui;
pub mod walker;
