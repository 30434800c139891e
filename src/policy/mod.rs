// Versioned Policy Registry
//
// The registry is the one piece of shared mutable state in the rollout loop:
// the scorer reads the current control rate from it, and the rollout
// controller appends a new version after every decision cycle. History is
// append-only; a version is never rewritten or pruned.
//
// Persistence goes through the RegistryStore seam. The JSON file store
// replaces the whole document with an atomic rename and serializes writers
// from any process through a sidecar lock file. The service wraps every
// read-modify-write in both locks.

mod registry;
mod state;

pub use registry::{
    JsonFileStore, LockFile, MemoryStore, PolicyRegistryService, RegistryError, RegistryStore, Transaction,
};
pub use state::{PolicyMode, PolicyRegistry, PolicyState, PolicyUpdate};

#[cfg(test)]
mod tests;
