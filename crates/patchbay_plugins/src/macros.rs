//! Macros for backend library development

/// Generate the FFI exports a dynamically loaded backend library needs.
///
/// The named type must implement [`Backend`](crate::Backend) and
/// `Default`; panics are caught at the FFI boundary and surface as a null
/// pointer to the loader.
#[macro_export]
macro_rules! declare_backend {
    ($backend:ty) => {
        /// Core version this backend was built against.
        #[no_mangle]
        pub unsafe extern "C" fn patchbay_backend_version() -> *const std::os::raw::c_char {
            let version = std::ffi::CString::new($crate::CORE_VERSION)
                .unwrap_or_else(|_| std::ffi::CString::new("invalid").unwrap());
            version.into_raw()
        }

        #[no_mangle]
        pub unsafe extern "C" fn patchbay_backend_create() -> *mut dyn $crate::Backend {
            match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                let backend: Box<dyn $crate::Backend> = Box::new(<$backend>::default());
                Box::into_raw(backend)
            })) {
                Ok(ptr) => ptr,
                Err(_) => {
                    eprintln!("backend constructor panicked");
                    // a fat null needs a concrete pointee to unsize from
                    std::ptr::null_mut::<$backend>() as *mut dyn $crate::Backend
                }
            }
        }

        #[no_mangle]
        pub unsafe extern "C" fn patchbay_backend_destroy(backend: *mut dyn $crate::Backend) {
            if backend.is_null() {
                return;
            }
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                let _ = Box::from_raw(backend);
            }));
        }
    };
}
