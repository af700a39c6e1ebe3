//! Node-local server components. Mirrors the teacher's `src/server`
//! layout, minus everything that belonged to the storage/Raft stack.

pub mod lock_manager;
