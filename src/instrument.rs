//! Bridge to an external memory checker (Valgrind Memcheck).
//!
//! With the `valgrind` feature on x86-64 Linux this issues Valgrind client
//! requests; everywhere else every hook compiles to nothing. Client requests
//! are no-ops when the process is not running under Valgrind, so an
//! instrumented build is still usable natively.
//!
//! The allocator uses the bridge to:
//! - keep superblock headers no-access while caller code runs
//! - keep free objects no-access until they are handed out again
//! - announce page mappings as malloc-like and unmappings as free-like blocks

cfg_if::cfg_if! {
    if #[cfg(all(feature = "valgrind", target_arch = "x86_64", target_os = "linux"))] {
        const RUNNING_ON_VALGRIND: usize = 0x1001;
        const MALLOCLIKE_BLOCK: usize = 0x1301;
        const FREELIKE_BLOCK: usize = 0x1302;

        const MEMCHECK_BASE: usize = ((b'M' as usize) << 24) | ((b'C' as usize) << 16);
        const MAKE_MEM_NOACCESS: usize = MEMCHECK_BASE;
        const MAKE_MEM_DEFINED: usize = MEMCHECK_BASE + 2;

        /// Issue one client request. Returns `default` when not under Valgrind.
        #[inline(always)]
        fn client_request(default: usize, request: usize, args: [usize; 5]) -> usize {
            let block = [request, args[0], args[1], args[2], args[3], args[4]];
            let result;
            // The rotations sum to 128 bits and leave rdi unchanged; Valgrind
            // recognises the sequence and reads the request block from rax.
            unsafe {
                core::arch::asm!(
                    "rol rdi, 3",
                    "rol rdi, 13",
                    "rol rdi, 61",
                    "rol rdi, 51",
                    "xchg rbx, rbx",
                    in("rax") block.as_ptr(),
                    inout("rdx") default => result,
                    out("rdi") _,
                    options(nostack),
                );
            }
            result
        }

        /// Whether the process runs under Valgrind.
        #[inline]
        pub fn active() -> bool {
            client_request(0, RUNNING_ON_VALGRIND, [0; 5]) != 0
        }

        #[inline]
        pub fn make_defined(ptr: *const u8, len: usize) {
            client_request(0, MAKE_MEM_DEFINED, [ptr as usize, len, 0, 0, 0]);
        }

        #[inline]
        pub fn make_noaccess(ptr: *const u8, len: usize) {
            client_request(0, MAKE_MEM_NOACCESS, [ptr as usize, len, 0, 0, 0]);
        }

        #[inline]
        pub fn malloc_like(ptr: *const u8, len: usize) {
            client_request(0, MALLOCLIKE_BLOCK, [ptr as usize, len, 0, 0, 0]);
        }

        #[inline]
        pub fn free_like(ptr: *const u8) {
            client_request(0, FREELIKE_BLOCK, [ptr as usize, 0, 0, 0, 0]);
        }
    } else {
        #[inline(always)]
        pub fn active() -> bool {
            false
        }

        #[inline(always)]
        pub fn make_defined(_ptr: *const u8, _len: usize) {}

        #[inline(always)]
        pub fn make_noaccess(_ptr: *const u8, _len: usize) {}

        #[inline(always)]
        pub fn malloc_like(_ptr: *const u8, _len: usize) {}

        #[inline(always)]
        pub fn free_like(_ptr: *const u8) {}
    }
}
