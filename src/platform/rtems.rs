//! RTEMS services shared by the PowerPC boards: console, panic routine and heap.

use core::alloc::{GlobalAlloc, Layout};
use core::ffi::{c_char, c_int, c_void};
use core::{fmt, mem, ptr};

use log::Level;

extern "C" {
    fn printk(fmt: *const c_char, ...) -> c_int;
    fn BSP_panic(msg: *const c_char) -> !;
    fn posix_memalign(memptr: *mut *mut c_void, alignment: usize, size: usize) -> c_int;
    fn free(ptr: *mut c_void);
}

/// Handler nodes live on the C heap, next to the rest of the application.
struct Malloc;

unsafe impl GlobalAlloc for Malloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let mut ptr = ptr::null_mut();
        let align = layout.align().max(mem::size_of::<usize>());
        if posix_memalign(&mut ptr, align, layout.size()) != 0 {
            return ptr::null_mut();
        }
        ptr as *mut u8
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        free(ptr as *mut c_void)
    }
}

#[global_allocator]
static ALLOCATOR: Malloc = Malloc;

/// Writes to the polled RTEMS console, usable from the exception handler.
struct Console;

impl fmt::Write for Console {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        // SAFETY: "%.*s" never reads past `len` bytes, `s` needs no terminator.
        unsafe { printk(c"%.*s".as_ptr(), s.len() as c_int, s.as_ptr()) };
        Ok(())
    }
}

pub fn debug_print(_level: Level, args: fmt::Arguments) {
    let _ = fmt::Write::write_fmt(&mut Console, args);
}

pub fn panic(msg: &str) -> ! {
    debug_print(Level::Error, format_args!("memprobe: {}\n", msg));
    // SAFETY: the message is a valid C string.
    unsafe { BSP_panic(c"memprobe: fatal exception".as_ptr()) }
}
