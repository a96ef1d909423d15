#![no_std]
#![no_main]

extern crate alloc;
extern crate keelkernel;

use core::alloc::{GlobalAlloc, Layout};
use core::panic::PanicInfo;

use keelkernel::heap::{Heap, HeapFlags};
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

const POOL_FRAMES: usize = 512;
static mut POOL_BITMAP: [u8; POOL_FRAMES / 8] = [0; POOL_FRAMES / 8];

fn pool_heap(flags: HeapFlags) -> Heap<BitmapFrameAllocator<'static>> {
    let allocator = BitmapFrameAllocator::new(
        unsafe { &mut *core::ptr::addr_of_mut!(POOL_BITMAP) },
        POOL_FRAMES,
    );
    Heap::new(flags, allocator)
}

struct AllocFreeCycleReclaimsZone;
impl TestCase for AllocFreeCycleReclaimsZone {
    fn name(&self) -> &'static str {
        "alloc_free_cycle_reclaims_zone"
    }
    fn run(&self) -> TestResult {
        let h = pool_heap(HeapFlags::empty());
        let a = h.alloc(32);
        let b = h.alloc(32);
        assert_eq_test!(h.zone_count(), 1);
        h.free(a);
        h.free(b);
        assert_eq_test!(h.zone_count(), 0);
        TestResult::Passed
    }
}

struct SecureFlagZeroesMemory;
impl TestCase for SecureFlagZeroesMemory {
    fn name(&self) -> &'static str {
        "secure_flag_zeroes_memory"
    }
    fn run(&self) -> TestResult {
        let h = pool_heap(HeapFlags::SECURE);
        let p = h.alloc(48);
        let bytes = unsafe { core::slice::from_raw_parts(p as *const u8, 48) };
        assert_test!(bytes.iter().all(|&b| b == 0));
        TestResult::Passed
    }
}

struct LargeAllocationGetsOwnZone;
impl TestCase for LargeAllocationGetsOwnZone {
    fn name(&self) -> &'static str {
        "large_allocation_gets_own_zone"
    }
    fn run(&self) -> TestResult {
        let h = pool_heap(HeapFlags::empty());
        h.alloc(64);
        h.alloc(4096);
        assert_eq_test!(h.zone_count(), 2);
        TestResult::Passed
    }
}

static TESTS: &[&dyn TestCase] =
    &[&AllocFreeCycleReclaimsZone, &SecureFlagZeroesMemory, &LargeAllocationGetsOwnZone];
static SUITE: TestSuite = TestSuite::new("heap", TESTS);

#[no_mangle]
pub extern "C" fn kernel_main(_multiboot_magic: u32, _multiboot_addr: u32) -> ! {
    HEAP.0.call_once(|| {
        let allocator = BitmapFrameAllocator::new(
            unsafe { &mut *core::ptr::addr_of_mut!(ARENA_BITMAP) },
            ARENA_FRAMES,
        );
        Heap::new(HeapFlags::empty(), allocator)
    });
    console::init();
    println!("heap_tests booting");
    run_suite_and_exit(&SUITE);
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    println!("heap_tests panic: {}", info);
    keelkernel::test_framework::exit_qemu(false);
}

core::arch::global_asm!(include_str!("../boot/start.s"));
