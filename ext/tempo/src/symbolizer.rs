use std::ffi::c_void;

/// Symbol information for a single return address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedFrame {
    /// Demangled name, used as the identity of a Function.
    pub name: String,
    /// Raw symbol name as found in the object file. May equal `name`.
    pub system_name: String,
    pub filename: String,
    pub line: i64,
    /// First line of the function definition, 0 if unknown.
    pub start_line: i64,
}

impl ResolvedFrame {
    /// Placeholder for an address without symbol information.
    pub fn unknown(address: usize) -> Self {
        let name = format!("{:#x}", address);
        Self {
            system_name: name.clone(),
            name,
            filename: String::new(),
            line: 0,
            start_line: 0,
        }
    }
}

pub trait Symbolizer: Send + Sync {
    fn resolve(&self, address: usize) -> ResolvedFrame;
}

impl<F> Symbolizer for F
where
    F: Fn(usize) -> ResolvedFrame + Send + Sync,
{
    fn resolve(&self, address: usize) -> ResolvedFrame {
        self(address)
    }
}

/// Resolves addresses of the current process with the `backtrace` crate.
#[derive(Clone, Copy, Debug, Default)]
pub struct BacktraceSymbolizer;

impl Symbolizer for BacktraceSymbolizer {
    fn resolve(&self, address: usize) -> ResolvedFrame {
        // `backtrace::resolve` looks up `address - 1` itself, since return
        // addresses point at the instruction after the call.
        let mut resolved: Option<ResolvedFrame> = None;
        backtrace::resolve(address as *mut c_void, |symbol| {
            // Inlined frames are reported innermost first; keep that one.
            if resolved.is_some() {
                return;
            }
            let Some(symbol_name) = symbol.name() else {
                return;
            };
            let name = format!("{:#}", symbol_name);
            let system_name = symbol_name
                .as_str()
                .map(str::to_owned)
                .unwrap_or_else(|| name.clone());
            resolved = Some(ResolvedFrame {
                name,
                system_name,
                filename: symbol
                    .filename()
                    .map(|path| path.display().to_string())
                    .unwrap_or_default(),
                line: symbol.lineno().map(i64::from).unwrap_or(0),
                start_line: 0,
            });
        });

        resolved.unwrap_or_else(|| {
            log::trace!("No symbol information for {:#x}", address);
            ResolvedFrame::unknown(address)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[inline(never)]
    fn marker_function() -> usize {
        marker_function as usize
    }

    #[test]
    fn test_unknown_frame() {
        let frame = ResolvedFrame::unknown(0xdead);
        assert_eq!(frame.name, "0xdead");
        assert_eq!(frame.system_name, "0xdead");
        assert_eq!(frame.line, 0);
    }

    #[test]
    fn test_resolves_own_function() {
        // Lookup is at `address - 1`, so the first byte of the function is
        // only reachable as offset 1.
        for offset in 1..4 {
            let frame = BacktraceSymbolizer.resolve(marker_function() + offset);
            assert!(
                frame.name.contains("marker_function"),
                "offset {}: unexpected name {}",
                offset,
                frame.name
            );
        }
    }

    #[test]
    fn test_closure_symbolizer() {
        let symbolizer = |address: usize| ResolvedFrame {
            name: format!("fn_{:x}", address),
            ..ResolvedFrame::unknown(address)
        };
        assert_eq!(symbolizer.resolve(0xa).name, "fn_a");
    }
}
