// Sparkplug B primary host
//
// Ingests NBIRTH/DBIRTH/NDATA/DDATA/NDEATH/DDEATH messages from MQTT edge
// nodes, persists the resulting topology and metric history in SQLite, and
// exposes it through an HTTP query surface and an interactive shell.
//
// * **Codec**: Sparkplug B protobuf payload encode/decode
// * **Store**: SQLite-backed topology and metric history
// * **Model**: typed handles over the store plus name-based resolution
// * **Engine**: the protocol state machine - birth, data, death, rebirth
// * **HTTP**: read-only query surface over the topology model
// * **Repl**: interactive shell for ad hoc topology queries

pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod http;
pub mod model;
pub mod repl;
pub mod store;
