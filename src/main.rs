#![no_std]
#![no_main]

extern crate alloc;

use core::alloc::{GlobalAlloc, Layout};
use core::panic::PanicInfo;

use keelkernel::boot::{self, BootInfo, Flags};
use keelkernel::heap::Heap;
use keelkernel::ioglue::{self, ModuleSource};
use keelkernel::pmem::BitmapFrameAllocator;
use keelkernel::sched::Scheduler;
use keelkernel::syscall::{self, SyscallTable};
use keelkernel::{console, println};
use alloc::vec::Vec;
use spin::{Mutex, Once};

core::arch::global_asm!(include_str!("boot/start.s"));

/// Bootstrap physical arena the frame allocator hands out pages from. A
/// real memory-map walk (per `BootInfo::mmap_addr`/`mmap_length`) would
/// replace this once the kernel trusts multiboot's reported regions; this
/// fixed BSS region is what gets the heap running before that trust is
/// established.
const ARENA_FRAMES: usize = 4096;
static mut ARENA_BITMAP: [u8; ARENA_FRAMES / 8] = [0; ARENA_FRAMES / 8];

struct GlobalHeap(Once<Heap<BitmapFrameAllocator<'static>>>);

unsafe impl GlobalAlloc for GlobalHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.0.get().expect("heap used before init").alloc(layout.size()) as *mut u8
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        self.0.get().expect("heap used before init").free(ptr as usize);
    }
}

#[global_allocator]
static HEAP: GlobalHeap = GlobalHeap(Once::new());

static SCHEDULER: Mutex<Option<Scheduler>> = Mutex::new(None);
static SYSCALLS: Mutex<Option<SyscallTable>> = Mutex::new(None);

/// No multiboot modules are embedded at boot time yet, so `ioglue::load`'s
/// `DT_NEEDED` resolution has nothing to fetch from; `--no-ioglue` is the
/// only way this currently matters in practice.
struct NoModules;

impl ModuleSource for NoModules {
    fn fetch(&self, _name: &str) -> Option<Vec<u8>> {
        None
    }
}

/// Mirrors `sys_init` in the original bootstrap: logs the module name,
/// runs `f`, and panics on failure if the module is essential.
fn sys_init(name: &str, essential: bool, f: impl FnOnce() -> bool) {
    println!("initializing {}... {{", name);
    if f() {
        println!("}} ok");
    } else {
        println!("}} failed");
        if essential {
            panic!("failed to initialize essential module '{}'", name);
        }
    }
}

#[no_mangle]
pub extern "C" fn kernel_main(multiboot_magic: u32, multiboot_addr: u32) -> ! {
    console::init();

    let info = if multiboot_magic == 0x2BADB002 {
        let bytes = unsafe { core::slice::from_raw_parts(multiboot_addr as *const u8, 128) };
        boot::parse(bytes).unwrap_or_default()
    } else {
        BootInfo::default()
    };

    let cmdline = ""; // cmdline string reading needs a real mapped address; deferred.
    let flags = Flags::parse(cmdline);

    HEAP.0.call_once(|| {
        let allocator = BitmapFrameAllocator::new(
            unsafe { &mut *core::ptr::addr_of_mut!(ARENA_BITMAP) },
            ARENA_FRAMES,
        );
        Heap::new(flags.heap_flags(), allocator)
    });

    println!("keelkernel booting");

    sys_init("scheduler", true, || {
        *SCHEDULER.lock() = Some(Scheduler::new());
        true
    });

    sys_init("syscalls", true, || {
        *SYSCALLS.lock() = Some(syscall::default_table());
        true
    });

    // Not essential yet: no multiboot modules are embedded at boot time, so
    // there are no real libkernel.so bytes to hand `ioglue::load` and it
    // would fail every boot on an empty slice. Flip this back to essential
    // once module bytes are actually wired up from `info.mods_count`.
    sys_init("ioglue", false, || {
        if flags.no_ioglue {
            return true;
        }
        let source = NoModules;
        source.fetch("libkernel.so").is_some_and(|bytes| ioglue::load("libkernel.so", &bytes, &source).is_ok())
    });

    println!("mods_count={} mem_upper={}", info.mods_count, info.mem_upper);
    println!("keelkernel ready");

    loop {
        let mut scheduler = SCHEDULER.lock();
        if let Some(s) = scheduler.as_mut() {
            s.tick();
        }
        drop(scheduler);
        unsafe { core::arch::asm!("hlt") };
    }
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    println!("kernel panic: {}", info);
    loop {
        unsafe { core::arch::asm!("hlt") };
    }
}
