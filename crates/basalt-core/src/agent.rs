//! Task agents: the logic a task executes inside a worker.
//!
//! An agent is looked up by the opaque `agent` string in the task payload
//! and runs against an owner-scoped view of the worker's memory pool. The
//! built-in set stands in for a higher-level language runtime that
//! compiles programs down to task payloads; custom runtimes register
//! their own agents through [`AgentRegistry::register`].

use std::collections::HashMap;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::memory::{MemoryHandle, MemoryPool};

/// Owner-scoped view of the worker's memory pool.
///
/// Every access goes through the pool's owner/bounds/read-only checks with
/// the task's owner as the requester — an agent cannot address another
/// owner's allocations. Handles the agent leaks are reclaimed by the
/// worker when the task finishes.
pub struct MemoryContext<'a> {
    pool: &'a mut MemoryPool,
    owner: &'a str,
    live: Vec<MemoryHandle>,
}

impl<'a> MemoryContext<'a> {
    pub fn new(pool: &'a mut MemoryPool, owner: &'a str) -> Self {
        Self {
            pool,
            owner,
            live: Vec::new(),
        }
    }

    pub fn owner(&self) -> &str {
        self.owner
    }

    pub fn allocate(&mut self, size: usize) -> Result<MemoryHandle> {
        let handle = self.pool.allocate(self.owner, size)?;
        self.live.push(handle);
        Ok(handle)
    }

    pub fn read(&self, handle: MemoryHandle, offset: usize, len: usize) -> Result<Vec<u8>> {
        Ok(self.pool.read(handle, self.owner, offset, len)?)
    }

    pub fn write(&mut self, handle: MemoryHandle, offset: usize, data: &[u8]) -> Result<()> {
        Ok(self.pool.write(handle, self.owner, offset, data)?)
    }

    pub fn protect(&mut self, handle: MemoryHandle) -> Result<()> {
        Ok(self.pool.protect(handle, self.owner)?)
    }

    pub fn release(&mut self, handle: MemoryHandle) -> Result<()> {
        self.pool.release(handle, self.owner)?;
        self.live.retain(|h| *h != handle);
        Ok(())
    }

    /// Handles allocated through this context and not yet released.
    pub(crate) fn into_live_handles(self) -> Vec<MemoryHandle> {
        self.live
    }
}

/// One unit of executable task logic.
///
/// Errors returned here become task-level failures (`FAILED` +
/// `last_error`); they never escape the worker.
pub trait Agent: Send + Sync {
    fn name(&self) -> &'static str;
    fn run(&self, input: &str, mem: &mut MemoryContext<'_>) -> Result<String>;
}

/// Lookup table from payload agent id to implementation.
pub struct AgentRegistry {
    agents: HashMap<&'static str, Box<dyn Agent>>,
}

impl AgentRegistry {
    /// Registry with the built-in agents.
    pub fn builtin() -> Self {
        let mut registry = Self {
            agents: HashMap::new(),
        };
        registry.register(Box::new(NoopAgent));
        registry.register(Box::new(EchoAgent));
        registry.register(Box::new(FillAgent));
        registry.register(Box::new(SleepAgent));
        registry
    }

    pub fn register(&mut self, agent: Box<dyn Agent>) {
        self.agents.insert(agent.name(), agent);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Agent> {
        self.agents.get(name).map(|a| a.as_ref())
    }
}

/// Completes immediately without touching memory.
struct NoopAgent;

impl Agent for NoopAgent {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn run(&self, _input: &str, _mem: &mut MemoryContext<'_>) -> Result<String> {
        Ok(String::new())
    }
}

/// Round-trips the input through a pool allocation.
struct EchoAgent;

impl Agent for EchoAgent {
    fn name(&self) -> &'static str {
        "echo"
    }

    fn run(&self, input: &str, mem: &mut MemoryContext<'_>) -> Result<String> {
        if input.is_empty() {
            return Ok(String::new());
        }
        let bytes = input.as_bytes();
        let handle = mem.allocate(bytes.len())?;
        mem.write(handle, 0, bytes)?;
        let back = mem.read(handle, 0, bytes.len())?;
        mem.release(handle)?;
        String::from_utf8(back).map_err(|e| Error::Execution(format!("echo: {e}")))
    }
}

/// Allocates N bytes (input = decimal byte count), writes a marker
/// pattern at both ends, and seals the allocation read-only. The
/// allocation is left live so capacity pressure is observable; the worker
/// reclaims it when the task finishes.
struct FillAgent;

impl Agent for FillAgent {
    fn name(&self) -> &'static str {
        "fill"
    }

    fn run(&self, input: &str, mem: &mut MemoryContext<'_>) -> Result<String> {
        let size: usize = input
            .trim()
            .parse()
            .map_err(|e| Error::Execution(format!("fill: invalid byte count {input:?}: {e}")))?;
        let handle = mem.allocate(size)?;
        mem.write(handle, 0, &[0xA5])?;
        mem.write(handle, size - 1, &[0x5A])?;
        mem.protect(handle)?;
        Ok(format!("filled {size} bytes"))
    }
}

/// Sleeps for the given number of milliseconds. Useful for exercising
/// quantum overrun accounting.
struct SleepAgent;

impl Agent for SleepAgent {
    fn name(&self) -> &'static str {
        "sleep"
    }

    fn run(&self, input: &str, _mem: &mut MemoryContext<'_>) -> Result<String> {
        let ms: u64 = input
            .trim()
            .parse()
            .map_err(|e| Error::Execution(format!("sleep: invalid millis {input:?}: {e}")))?;
        std::thread::sleep(Duration::from_millis(ms));
        Ok(format!("slept {ms}ms"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MemoryViolation;

    #[test]
    fn builtin_registry_resolves_known_agents() {
        let registry = AgentRegistry::builtin();
        for name in ["noop", "echo", "fill", "sleep"] {
            assert!(registry.get(name).is_some(), "missing agent {name}");
        }
        assert!(registry.get("thirsty-lang").is_none());
    }

    #[test]
    fn echo_round_trips_through_the_pool() {
        let registry = AgentRegistry::builtin();
        let mut pool = MemoryPool::new(1024);
        let mut ctx = MemoryContext::new(&mut pool, "tenant-a");
        let out = registry
            .get("echo")
            .unwrap()
            .run("hello world", &mut ctx)
            .unwrap();
        assert_eq!(out, "hello world");
        assert!(ctx.into_live_handles().is_empty());
        assert_eq!(pool.used_bytes(), 0);
    }

    #[test]
    fn fill_leaves_a_live_read_only_allocation() {
        let registry = AgentRegistry::builtin();
        let mut pool = MemoryPool::new(1024);
        let mut ctx = MemoryContext::new(&mut pool, "tenant-a");
        registry.get("fill").unwrap().run("128", &mut ctx).unwrap();
        let live = ctx.into_live_handles();
        assert_eq!(live.len(), 1);
        assert_eq!(pool.used_bytes(), 128);
        assert_eq!(
            pool.write(live[0], "tenant-a", 0, b"x"),
            Err(MemoryViolation::ReadOnly(live[0].id()))
        );
    }

    #[test]
    fn fill_larger_than_pool_fails_with_capacity_error() {
        let registry = AgentRegistry::builtin();
        let mut pool = MemoryPool::new(64);
        let mut ctx = MemoryContext::new(&mut pool, "tenant-a");
        let err = registry
            .get("fill")
            .unwrap()
            .run("1000", &mut ctx)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Memory(MemoryViolation::CapacityExceeded { .. })
        ));
    }

    #[test]
    fn fill_rejects_garbage_input() {
        let registry = AgentRegistry::builtin();
        let mut pool = MemoryPool::new(64);
        let mut ctx = MemoryContext::new(&mut pool, "tenant-a");
        assert!(matches!(
            registry.get("fill").unwrap().run("lots", &mut ctx),
            Err(Error::Execution(_))
        ));
    }

    #[test]
    fn context_scopes_access_to_its_owner() {
        let mut pool = MemoryPool::new(1024);
        let foreign = pool.allocate("tenant-b", 32).unwrap();
        let ctx = MemoryContext::new(&mut pool, "tenant-a");
        assert!(ctx.read(foreign, 0, 1).is_err());
    }
}
