// Library root
// -----------
// Both binaries are thin shells around this crate.
//
// Module responsibilities:
// - `cli`: clap definition of `osimage-upload` and conversion into an
//   `UploadRequest`.
// - `request`: upload parameters, disk format inference, visibility.
// - `config`: immutable run configuration and OpenStack credentials.
// - `runner`: the `CommandRunner` seam used to start external tools.
// - `openstack`: image commands of the OpenStack CLI.
// - `workflow`: the staged upload pipeline.
// - `infra`: the Terraform task runner behind `osimage-infra`.
// - `output`: colored operator-facing messages.
// - `error`: the failure taxonomy shared by the upload stages.
pub mod cli;
pub mod config;
pub mod error;
pub mod infra;
pub mod openstack;
pub mod output;
pub mod request;
pub mod runner;
pub mod telemetry;
pub mod workflow;
