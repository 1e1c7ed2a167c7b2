//! Guest module compilation.
//!
//! Partitions are loaded from either the binary format or WAT text. The
//! format is sniffed from the leading bytes, so callers never need to say
//! which one they pass.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::time::Instant;

use tracing::{debug, instrument};
use wasmtime::{Engine, Module};

use fuelslice_common::EngineError;

const WASM_MAGIC: &[u8; 4] = b"\0asm";

/// Magic number plus version.
const WASM_HEADER_LEN: usize = 8;

/// Encoding of a module's source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleFormat {
    /// `\0asm` binary.
    Binary,
    /// UTF-8 WebAssembly text.
    Text,
}

impl ModuleFormat {
    /// Classify `bytes` without compiling them.
    ///
    /// # Errors
    ///
    /// A compile error for a truncated binary header or bytes that are
    /// neither binary nor UTF-8.
    pub fn detect(bytes: &[u8]) -> Result<Self, EngineError> {
        if bytes.starts_with(WASM_MAGIC) {
            if bytes.len() < WASM_HEADER_LEN {
                return Err(EngineError::compile("Invalid Wasm: truncated header"));
            }
            return Ok(Self::Binary);
        }

        if std::str::from_utf8(bytes).is_ok() {
            Ok(Self::Text)
        } else {
            Err(EngineError::compile(
                "Invalid Wasm: neither a binary module nor UTF-8 text",
            ))
        }
    }
}

/// A compiled guest module, shareable across partition stores.
#[derive(Clone)]
pub struct CompiledModule {
    inner: Module,
    format: ModuleFormat,
    fingerprint: u64,
}

impl CompiledModule {
    /// Compile `bytes` as binary or WAT, whichever they are.
    ///
    /// # Errors
    ///
    /// A compile error if the format is unrecognized or Wasmtime rejects the
    /// module.
    #[instrument(skip_all, fields(bytes_len = bytes.len()))]
    pub fn compile(engine: &Engine, bytes: &[u8]) -> Result<Self, EngineError> {
        let format = ModuleFormat::detect(bytes)?;
        let started = Instant::now();

        let inner = Module::new(engine, bytes)
            .map_err(|e| EngineError::compile(format!("{format:?} module rejected: {e}")))?;
        let fingerprint = fingerprint(bytes);

        debug!(
            ?format,
            fingerprint = %format!("{fingerprint:016x}"),
            elapsed_ms = started.elapsed().as_millis(),
            "Module compiled"
        );

        Ok(Self {
            inner,
            format,
            fingerprint,
        })
    }

    /// Source encoding the module was compiled from.
    pub fn format(&self) -> ModuleFormat {
        self.format
    }

    /// Hash of the source bytes. Identical sources share a fingerprint.
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    /// The Wasmtime module.
    pub fn as_module(&self) -> &Module {
        &self.inner
    }
}

impl std::fmt::Debug for CompiledModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledModule")
            .field("format", &self.format)
            .field("fingerprint", &format_args!("{:016x}", self.fingerprint))
            .finish_non_exhaustive()
    }
}

fn fingerprint(bytes: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    hasher.finish()
}
