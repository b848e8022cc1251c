/// Unwraps a `Result<_, SceKernelError>`, returning the error code from the
/// enclosing HLE routine on failure.
macro_rules! hle_try {
    ($expr:expr) => {{
        let res: Result<_, $crate::errors::SceKernelError> = $expr;
        match res {
            Ok(val) => val,
            Err(err) => return err.into(),
        }
    }};
    ($expr:expr; $e:expr) => {{
        let opt: Option<_> = $expr;
        hle_try!(opt.ok_or($e))
    }};
}
