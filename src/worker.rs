//! Deeply recursive work on a thread with a caller-chosen stack.
//!
//! The interpreter, compiler and encoder recurse once per nested node, so a
//! long chain of case-splits can exhaust the default stack. Every façade entry
//! point runs through [`run_on_worker`].

use std::panic;
use std::thread;

use log::trace;

/// 64 MiB.
pub const DEFAULT_STACK_SIZE: usize = 64 * 1024 * 1024;

/// Run `f` to completion on a scoped thread with `stack_size` bytes of stack
/// and return its result. A panic in `f` resumes on the calling thread.
pub fn run_on_worker<T, F>(stack_size: usize, f: F) -> T
where
    F: FnOnce() -> T + Send,
    T: Send,
{
    thread::scope(|scope| {
        trace!("spawning worker with {} bytes of stack", stack_size);
        let handle = match thread::Builder::new()
            .name("triform-worker".to_string())
            .stack_size(stack_size)
            .spawn_scoped(scope, f)
        {
            Ok(handle) => handle,
            Err(e) => panic!("failed to spawn worker thread: {}", e),
        };
        match handle.join() {
            Ok(value) => value,
            Err(payload) => panic::resume_unwind(payload),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;

    fn depth(n: u64) -> u64 {
        if n == 0 {
            0
        } else {
            1 + depth(n - 1)
        }
    }

    #[test]
    fn test_returns_result() {
        let data = vec![1, 2, 3];
        let sum = run_on_worker(DEFAULT_STACK_SIZE, || data.iter().sum::<i32>());
        assert_eq!(sum, 6);
    }

    #[test]
    fn test_deep_recursion() {
        let n = run_on_worker(DEFAULT_STACK_SIZE, || depth(100_000));
        assert_eq!(n, 100_000);
    }

    #[test]
    #[should_panic(expected = "boom")]
    fn test_panic_propagates() {
        run_on_worker(DEFAULT_STACK_SIZE, || panic!("boom"));
    }
}
