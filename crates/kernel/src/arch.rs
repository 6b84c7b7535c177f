// cSpell:ignore kmain

/// The entry point the boot loader jumps to once the kernel image is loaded.
#[cfg(target_os = "none")]
#[unsafe(no_mangle)]
pub extern "C" fn kmain(boot_info: &'static crate::BootInfo) -> ! {
    crate::kernel_main(boot_info)
}

#[cfg(target_os = "none")]
#[panic_handler]
fn rust_panic(info: &core::panic::PanicInfo) -> ! {
    log::error!("kernel panic: {}", info);
    park()
}

pub fn park() -> ! {
    loop {
        // SAFETY: hlt only waits for the next interrupt.
        unsafe { core::arch::asm!("hlt", options(nomem, nostack)) };
    }
}
