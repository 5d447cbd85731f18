/// Logs a dispatched guest syscall when the `strace` feature is enabled.
macro_rules! strace {
	($($arg:tt)+) => {{
		#[cfg(feature = "strace")]
		trace!($($arg)+);
	}};
}
