//! Hand-off of built modules to an external loader.

use anyhow::Result;
use tracing::{debug, warn};

use super::cache::BytecodeCache;
use super::push::BytecodeBuilder;
use super::validate::decompress;

/// Whatever executes a module. The buffer is only borrowed for the call.
pub trait BytecodeLoader {
    /// Run `bytecode`; `true` when the loader accepted and ran it.
    fn execute(&mut self, bytecode: &[u8]) -> bool;
}

impl<F> BytecodeLoader for F
where
    F: FnMut(&[u8]) -> bool,
{
    fn execute(&mut self, bytecode: &[u8]) -> bool {
        self(bytecode)
    }
}

/// A single value ready to be pushed.
#[derive(Debug, Clone, PartialEq)]
pub enum PushValue {
    Nil,
    Boolean(bool),
    Number(f64),
    Integer(i64),
    String(Vec<u8>),
}

impl From<()> for PushValue {
    fn from(_: ()) -> Self {
        PushValue::Nil
    }
}

impl From<bool> for PushValue {
    fn from(value: bool) -> Self {
        PushValue::Boolean(value)
    }
}

impl From<f64> for PushValue {
    fn from(value: f64) -> Self {
        PushValue::Number(value)
    }
}

impl From<f32> for PushValue {
    fn from(value: f32) -> Self {
        PushValue::Number(f64::from(value))
    }
}

impl From<i32> for PushValue {
    fn from(value: i32) -> Self {
        PushValue::Integer(i64::from(value))
    }
}

impl From<i64> for PushValue {
    fn from(value: i64) -> Self {
        PushValue::Integer(value)
    }
}

impl From<&str> for PushValue {
    fn from(value: &str) -> Self {
        PushValue::String(value.as_bytes().to_vec())
    }
}

impl From<String> for PushValue {
    fn from(value: String) -> Self {
        PushValue::String(value.into_bytes())
    }
}

impl<T: Into<PushValue>> From<Option<T>> for PushValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(PushValue::Nil, Into::into)
    }
}

/// Builds modules (scalars through a [`BytecodeCache`]) and passes them to a
/// [`BytecodeLoader`], reporting the loader's verdict.
#[derive(Debug)]
pub struct BytecodePusher<L> {
    loader: L,
    cache: BytecodeCache,
}

impl<L: BytecodeLoader> BytecodePusher<L> {
    pub fn new(loader: L) -> Self {
        Self::with_builder(loader, BytecodeBuilder::default())
    }

    pub fn with_builder(loader: L, builder: BytecodeBuilder) -> Self {
        Self {
            loader,
            cache: BytecodeCache::new(builder),
        }
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }

    pub fn loader_mut(&mut self) -> &mut L {
        &mut self.loader
    }

    pub fn cache(&self) -> &BytecodeCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut BytecodeCache {
        &mut self.cache
    }

    pub fn into_loader(self) -> L {
        self.loader
    }

    fn run(loader: &mut L, bytecode: &[u8]) -> bool {
        let ok = loader.execute(decompress(bytecode));
        debug!(len = bytecode.len(), ok, "bytecode handed to loader");
        ok
    }

    fn run_built(&mut self, what: &str, built: Result<Vec<u8>>) -> bool {
        match built {
            Ok(bytecode) => Self::run(&mut self.loader, &bytecode),
            Err(err) => {
                warn!(what, error = %format!("{err:#}"), "failed to build bytecode");
                false
            }
        }
    }

    pub fn push(&mut self, value: impl Into<PushValue>) -> bool {
        match value.into() {
            PushValue::Nil => self.push_nil(),
            PushValue::Boolean(b) => self.push_boolean(b),
            PushValue::Number(n) => self.push_number(n),
            PushValue::Integer(i) => self.push_integer(i),
            PushValue::String(s) => self.push_string(&s),
        }
    }

    pub fn push_nil(&mut self) -> bool {
        let bytecode = self.cache.builder().push_nil();
        Self::run(&mut self.loader, &bytecode)
    }

    pub fn push_boolean(&mut self, value: bool) -> bool {
        Self::run(&mut self.loader, self.cache.get_boolean(value))
    }

    pub fn push_number(&mut self, value: f64) -> bool {
        Self::run(&mut self.loader, self.cache.get_number(value))
    }

    pub fn push_integer(&mut self, value: i64) -> bool {
        Self::run(&mut self.loader, self.cache.get_integer(value))
    }

    pub fn push_string(&mut self, value: &[u8]) -> bool {
        Self::run(&mut self.loader, self.cache.get_string(value))
    }

    pub fn push_table(&mut self, array_size: u16, hash_size: u8) -> bool {
        let bytecode = self.cache.builder().push_table(array_size, hash_size);
        Self::run(&mut self.loader, &bytecode)
    }

    pub fn push_array<S: AsRef<[u8]>>(&mut self, values: &[S]) -> bool {
        let built = self.cache.builder().push_array(values);
        self.run_built("array", built)
    }

    pub fn push_dictionary<K: AsRef<[u8]>, V: AsRef<[u8]>>(&mut self, pairs: &[(K, V)]) -> bool {
        let built = self.cache.builder().push_dictionary(pairs);
        self.run_built("dictionary", built)
    }

    pub fn push_multiple<S: AsRef<str>>(&mut self, values: &[S]) -> bool {
        let built = self.cache.builder().push_multiple(values);
        self.run_built("multiple", built)
    }

    pub fn call_function<S: AsRef<str>>(&mut self, name: &str, args: &[S], returns: u8) -> bool {
        let built = self.cache.builder().function_call(name, args, returns);
        self.run_built("function call", built)
    }

    /// Translate `source` strictly; unsupported input is a failed push rather
    /// than a nil.
    pub fn execute_source(&mut self, source: &str) -> bool {
        let built = self.cache.builder().compile_strict(source);
        self.run_built("source", built)
    }

    /// Pass an externally produced buffer through, stripping any signing
    /// wrapper first.
    pub fn execute_raw(&mut self, bytecode: &[u8]) -> bool {
        Self::run(&mut self.loader, bytecode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{
        SIGNATURE_MAGIC, create_push_boolean, create_push_nil, create_push_number, create_push_string,
        validate_bytecode,
    };

    #[derive(Default)]
    struct Recorder {
        seen: Vec<Vec<u8>>,
        accept: bool,
    }

    impl BytecodeLoader for Recorder {
        fn execute(&mut self, bytecode: &[u8]) -> bool {
            self.seen.push(bytecode.to_vec());
            self.accept
        }
    }

    fn pusher() -> BytecodePusher<Recorder> {
        BytecodePusher::new(Recorder {
            accept: true,
            ..Recorder::default()
        })
    }

    #[test]
    fn generic_push_dispatches_by_kind() {
        let mut pusher = pusher();
        assert!(pusher.push(()));
        assert!(pusher.push(true));
        assert!(pusher.push(2.5));
        assert!(pusher.push("s"));
        let seen = &pusher.loader().seen;
        assert_eq!(seen[0], create_push_nil());
        assert_eq!(seen[1], create_push_boolean(true));
        assert_eq!(seen[2], create_push_number(2.5));
        assert_eq!(seen[3], create_push_string("s"));
    }

    #[test]
    fn scalar_pushes_go_through_the_cache() {
        let mut pusher = pusher();
        pusher.push(7i64);
        pusher.push(7i64);
        pusher.push(Some("x"));
        assert_eq!(pusher.cache().len(), 2);
        assert_eq!(pusher.loader().seen.len(), 3);
        assert_eq!(pusher.loader().seen[0], pusher.loader().seen[1]);
    }

    #[test]
    fn loader_verdict_is_returned() {
        let mut pusher = BytecodePusher::new(Recorder::default());
        assert!(!pusher.push_boolean(true));
        assert_eq!(pusher.loader().seen.len(), 1);

        pusher.loader_mut().accept = true;
        assert!(pusher.push_boolean(true));
        let recorder = pusher.into_loader();
        assert_eq!(recorder.seen.len(), 2);
        assert_eq!(recorder.seen[0], recorder.seen[1]);
    }

    #[test]
    fn clearing_the_cache_rebuilds_on_next_push() {
        let mut pusher = pusher();
        pusher.push_string(b"abc");
        pusher.push_number(1.0);
        assert_eq!(pusher.cache().len(), 2);
        pusher.cache_mut().clear();
        assert!(pusher.cache().is_empty());
        assert!(pusher.push_string(b"abc"));
        assert_eq!(pusher.cache().len(), 1);
        assert_eq!(pusher.loader().seen[0], pusher.loader().seen[2]);
    }

    #[test]
    fn build_errors_report_false_without_loading() {
        let mut pusher = pusher();
        let args = vec!["1"; 300];
        assert!(!pusher.call_function("print", &args, 0));
        assert!(!pusher.execute_source("return x"));
        assert!(pusher.loader().seen.is_empty());
        assert!(pusher.execute_source("return 1"));
    }

    #[test]
    fn signed_buffers_are_stripped_before_loading() {
        let mut pusher = pusher();
        let inner = create_push_number(4.0);
        let mut signed = SIGNATURE_MAGIC.to_vec();
        signed.extend_from_slice(&[0u8; 16]);
        signed.extend_from_slice(&inner);
        assert!(pusher.execute_raw(&signed));
        assert_eq!(pusher.loader().seen[0], inner);
        assert!(validate_bytecode(&pusher.loader().seen[0]));
    }

    #[test]
    fn closures_act_as_loaders() {
        let mut count = 0usize;
        let mut pusher = BytecodePusher::new(|bytes: &[u8]| {
            count += bytes.len();
            true
        });
        assert!(pusher.push_array(&["a", "b"]));
        drop(pusher);
        assert!(count > 0);
    }
}
