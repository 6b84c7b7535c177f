#![cfg_attr(not(test), no_std)]

mod arch;
pub mod boot_info;
mod console;
pub mod mem;
mod serial;

pub use boot_info::BootInfo;

pub fn kernel_main(boot_info: &'static BootInfo) -> ! {
    let console = console::Console::init();
    serial::init(console);
    debug_assert!(console.has_output());
    log::info!(
        "Tessera booting from drive {:#04x}, kernel image {} bytes",
        boot_info.boot_device,
        boot_info.kernel_size
    );

    mem::init(boot_info);
    log::debug!("Physical and virtual memory managers initialized");

    if let Some(free) = mem::with_memory(|memory| memory.pmm.free_block_count()) {
        log::info!("{} frames free after paging setup", free);
    }

    arch::park()
}
