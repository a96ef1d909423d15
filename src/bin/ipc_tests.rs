#![no_std]
#![no_main]

extern crate alloc;
extern crate keelkernel;

use core::alloc::{GlobalAlloc, Layout};
use core::panic::PanicInfo;

use keelkernel::heap::Heap;
use keelkernel::ipc::{Message, Port, PortName, Rights};
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

struct MessageRoundTripsThroughPort;
impl TestCase for MessageRoundTripsThroughPort {
    fn name(&self) -> &'static str {
        "message_round_trips_through_port"
    }
    fn run(&self) -> TestResult {
        let mut port = Port::new(1, 0, 1, Rights::SEND | Rights::RECEIVE);
        let sender = PortName::new(2, 0, 1);
        port.push(Message {
            sender,
            receiver: port.name,
            id: 42,
            flags: 0,
            payload: alloc::vec![1, 2, 3],
            transferred_right: None,
        })
        .expect("receive right is present");
        let msg = port.pop().expect("pop does not error").expect("message is queued");
        assert_eq_test!(msg.id, 42);
        assert_eq_test!(msg.payload.len(), 3);
        TestResult::Passed
    }
}

struct SendOnlyPortRejectsPush;
impl TestCase for SendOnlyPortRejectsPush {
    fn name(&self) -> &'static str {
        "send_only_port_rejects_push"
    }
    fn run(&self) -> TestResult {
        let mut port = Port::new(1, 0, 2, Rights::SEND);
        let msg = Message {
            sender: PortName::new(1, 0, 2),
            receiver: PortName::new(1, 0, 2),
            id: 0,
            flags: 0,
            payload: alloc::vec![],
            transferred_right: None,
        };
        assert_test!(port.push(msg).is_err());
        TestResult::Passed
    }
}

struct PortRightPreservesRightsNotName;
impl TestCase for PortRightPreservesRightsNotName {
    fn name(&self) -> &'static str {
        "port_right_preserves_rights_not_name"
    }
    fn run(&self) -> TestResult {
        let port = Port::new(1, 7, 3, Rights::SEND);
        let right = port.as_port_right(9, 5);
        assert_eq_test!(right.rights, Rights::SEND);
        assert_eq_test!(right.name.pid(), 9);
        assert_eq_test!(right.name.system_id(), 7);
        assert_eq_test!(right.name.local_name(), 5);
        TestResult::Passed
    }
}

static TESTS: &[&dyn TestCase] = &[
    &MessageRoundTripsThroughPort,
    &SendOnlyPortRejectsPush,
    &PortRightPreservesRightsNotName,
];
static SUITE: TestSuite = TestSuite::new("ipc", TESTS);

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
    println!("ipc_tests booting");
    run_suite_and_exit(&SUITE);
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    println!("ipc_tests panic: {}", info);
    keelkernel::test_framework::exit_qemu(false);
}

core::arch::global_asm!(include_str!("../boot/start.s"));
