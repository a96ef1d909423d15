#![no_std]
#![no_main]

extern crate alloc;
extern crate keelkernel;

use core::alloc::{GlobalAlloc, Layout};
use core::panic::PanicInfo;

use keelkernel::boot::{self, Flags};
use keelkernel::heap::Heap;
use keelkernel::pmem::BitmapFrameAllocator;
use keelkernel::test_framework::{run_suite_and_exit, TestCase, TestResult, TestSuite};
use keelkernel::{assert_eq_test, assert_test, console, println};
use spin::Once;

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

struct MultibootHeaderParses;
impl TestCase for MultibootHeaderParses {
    fn name(&self) -> &'static str {
        "multiboot_header_parses"
    }
    fn run(&self) -> TestResult {
        let mut buf = [0u8; 64];
        buf[0..4].copy_from_slice(&(1u32 << 0).to_ne_bytes());
        buf[4..8].copy_from_slice(&640u32.to_ne_bytes());
        buf[8..12].copy_from_slice(&7168u32.to_ne_bytes());
        let info = boot::parse(&buf).expect("buffer is long enough to parse");
        assert_eq_test!(info.mem_lower, 640);
        assert_eq_test!(info.mem_upper, 7168);
        TestResult::Passed
    }
}

struct CmdlineFlagsParse;
impl TestCase for CmdlineFlagsParse {
    fn name(&self) -> &'static str {
        "cmdline_flags_parse"
    }
    fn run(&self) -> TestResult {
        let flags = Flags::parse("--no-ioglue --heap-secure");
        assert_test!(flags.no_ioglue);
        assert_test!(flags.heap_secure);
        TestResult::Passed
    }
}

struct HeapServesAllocStrings;
impl TestCase for HeapServesAllocStrings {
    fn name(&self) -> &'static str {
        "heap_serves_alloc_strings"
    }
    fn run(&self) -> TestResult {
        let mut s = alloc::string::String::new();
        for _ in 0..200 {
            s.push('x');
        }
        assert_eq_test!(s.len(), 200);
        TestResult::Passed
    }
}

static TESTS: &[&dyn TestCase] =
    &[&MultibootHeaderParses, &CmdlineFlagsParse, &HeapServesAllocStrings];
static SUITE: TestSuite = TestSuite::new("kernel", TESTS);

#[no_mangle]
pub extern "C" fn kernel_main(_multiboot_magic: u32, _multiboot_addr: u32) -> ! {
    HEAP.0.call_once(|| {
        let allocator = BitmapFrameAllocator::new(
            unsafe { &mut *core::ptr::addr_of_mut!(ARENA_BITMAP) },
            ARENA_FRAMES,
        );
        Heap::new(Default::default(), allocator)
    });
    console::init();
    println!("kernel_tests booting");
    run_suite_and_exit(&SUITE);
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    println!("kernel_tests panic: {}", info);
    keelkernel::test_framework::exit_qemu(false);
}

core::arch::global_asm!(include_str!("../boot/start.s"));
