//! The compiler seam and the host platform's native-kernel compiler.

use super::kernel::NativeKernel;
use super::source::KernelSource;
use super::BuildStatus;
use crate::error::{Error, Result};
use crate::platform::DeviceInfo;
use std::collections::{BTreeMap, HashMap};
use std::fmt::{self, Write as _};
use std::sync::Arc;

/// Outcome of compiling one source unit for one device.
#[derive(Clone)]
pub struct DeviceBuild {
    pub status: BuildStatus,
    pub log: String,
    pub kernels: BTreeMap<String, Arc<dyn NativeKernel>>,
}

impl fmt::Debug for DeviceBuild {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuild")
            .field("status", &self.status)
            .field("log", &self.log)
            .field("kernels", &self.kernels.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Compiler service for one platform.
///
/// Source defects come back as a [`DeviceBuild`] with [`BuildStatus::Error`]
/// and a log. `Err` is reserved for failures of the compiler invocation
/// itself.
pub trait KernelCompiler: Send + Sync {
    fn compile(
        &self,
        source: &KernelSource,
        device: &DeviceInfo,
        options: &BuildOptions,
    ) -> Result<DeviceBuild>;
}

/// Parsed build option string. `defines` steer conditional directives in
/// the source; include directories are kept for compilers that resolve
/// `#include`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOptions {
    raw: String,
    pub defines: Vec<(String, Option<String>)>,
    pub include_dirs: Vec<String>,
    pub flags: Vec<String>,
}

impl BuildOptions {
    /// Accepts `-D name[=value]`, `-I dir`, `-w`, `-Werror` and `-cl-*`
    /// flags. Anything else is an invalid invocation.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut options = BuildOptions {
            raw: raw.to_string(),
            ..Self::default()
        };
        let mut tokens = raw.split_whitespace();

        while let Some(token) = tokens.next() {
            if let Some(rest) = token.strip_prefix("-D") {
                let def = if rest.is_empty() { tokens.next() } else { Some(rest) };
                let def = def.ok_or_else(|| Error::runtime_build("-D needs a macro name"))?;
                let (name, value) = match def.split_once('=') {
                    Some((n, v)) => (n.to_string(), Some(v.to_string())),
                    None => (def.to_string(), None),
                };
                options.defines.push((name, value));
            } else if let Some(rest) = token.strip_prefix("-I") {
                let dir = if rest.is_empty() { tokens.next() } else { Some(rest) };
                let dir = dir.ok_or_else(|| Error::runtime_build("-I needs a directory"))?;
                options.include_dirs.push(dir.to_string());
            } else if token == "-w" || token == "-Werror" || token.starts_with("-cl-") {
                options.flags.push(token.to_string());
            } else {
                return Err(Error::runtime_build(format!(
                    "invalid build option '{}'",
                    token
                )));
            }
        }

        Ok(options)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

/// Native implementations of kernels, looked up by name at build time.
#[derive(Clone, Default)]
pub struct KernelRegistry {
    kernels: HashMap<String, Arc<dyn NativeKernel>>,
}

impl KernelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<K: NativeKernel + 'static>(&mut self, kernel: K) -> &mut Self {
        self.kernels
            .insert(kernel.name().to_string(), Arc::new(kernel));
        self
    }

    pub fn with<K: NativeKernel + 'static>(mut self, kernel: K) -> Self {
        self.register(kernel);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn NativeKernel>> {
        self.kernels.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.kernels.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }
}

impl fmt::Debug for KernelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.kernels.keys().collect();
        names.sort();
        f.debug_struct("KernelRegistry").field("kernels", &names).finish()
    }
}

/// Resolves `__kernel` declarations against a [`KernelRegistry`] and checks
/// each device's extension support.
#[derive(Debug, Clone)]
pub struct HostCompiler {
    registry: KernelRegistry,
}

impl HostCompiler {
    pub fn new(registry: KernelRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &KernelRegistry {
        &self.registry
    }
}

impl KernelCompiler for HostCompiler {
    fn compile(
        &self,
        source: &KernelSource,
        device: &DeviceInfo,
        options: &BuildOptions,
    ) -> Result<DeviceBuild> {
        let label = source.label();
        let mut log = String::new();
        let mut failed = false;
        let mut kernels = BTreeMap::new();
        let directives = source.directives(&options.defines);

        for directive in &directives.errors {
            let _ = writeln!(log, "{}:{}: error: {}", label, directive.line, directive.value);
            failed = true;
        }

        for ext in &directives.extensions {
            if !device.has_extension(&ext.value) {
                let _ = writeln!(
                    log,
                    "{}:{}: error: extension '{}' is not supported on {}",
                    label, ext.line, ext.value, device.name
                );
                failed = true;
            }
        }

        for decl in source.declarations() {
            if kernels.contains_key(&decl.name) {
                let _ = writeln!(
                    log,
                    "{}:{}: error: redefinition of kernel '{}'",
                    label, decl.line, decl.name
                );
                failed = true;
                continue;
            }

            let Some(native) = self.registry.get(&decl.name) else {
                let _ = writeln!(
                    log,
                    "{}:{}: error: no implementation for kernel '{}'",
                    label, decl.line, decl.name
                );
                failed = true;
                continue;
            };

            let missing: Vec<&String> = native
                .required_extensions()
                .iter()
                .filter(|ext| !device.has_extension(ext))
                .collect();
            if !missing.is_empty() {
                for ext in missing {
                    let _ = writeln!(
                        log,
                        "{}:{}: error: kernel '{}' requires extension '{}'",
                        label, decl.line, decl.name, ext
                    );
                }
                failed = true;
                continue;
            }

            kernels.insert(decl.name.clone(), native);
        }

        Ok(DeviceBuild {
            status: if failed {
                BuildStatus::Error
            } else {
                BuildStatus::Success
            },
            log,
            kernels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceSpec;
    use crate::program::kernel::{KernelDef, ParamKind};

    fn registry() -> KernelRegistry {
        KernelRegistry::new()
            .with(KernelDef::new("fill", vec![ParamKind::Global], |_| Ok(())))
            .with(
                KernelDef::new("count", vec![ParamKind::Global], |_| Ok(()))
                    .requires("cl_khr_global_int32_base_atomics"),
            )
    }

    #[test]
    fn test_build_options_parse() {
        let opts = BuildOptions::parse("-D WIDTH=16 -DDEBUG -I include -cl-fast-relaxed-math").unwrap();
        assert_eq!(
            opts.defines,
            vec![
                ("WIDTH".to_string(), Some("16".to_string())),
                ("DEBUG".to_string(), None)
            ]
        );
        assert_eq!(opts.include_dirs, vec!["include".to_string()]);
        assert_eq!(opts.flags, vec!["-cl-fast-relaxed-math".to_string()]);

        assert!(matches!(
            BuildOptions::parse("--fast"),
            Err(Error::RuntimeBuild(_))
        ));
        assert!(BuildOptions::parse("-D").is_err());
    }

    #[test]
    fn test_defines_satisfy_guarded_error() {
        let compiler = HostCompiler::new(registry());
        let source = KernelSource::new(
            "guarded.cl",
            "#ifndef TILE\n#error TILE is required\n#endif\n__kernel void fill(__global int* a) {}",
        );
        let device = DeviceInfo::from_spec(&DeviceSpec::gpu("G"));

        let bare = compiler
            .compile(&source, &device, &BuildOptions::default())
            .unwrap();
        assert_eq!(bare.status, BuildStatus::Error);
        assert!(bare.log.contains("guarded.cl:2: error: TILE is required"));

        let options = BuildOptions::parse("-D TILE=8").unwrap();
        let defined = compiler.compile(&source, &device, &options).unwrap();
        assert_eq!(defined.status, BuildStatus::Success, "{}", defined.log);
        assert!(defined.kernels.contains_key("fill"));
    }

    #[test]
    fn test_unknown_kernel_fails_with_log() {
        let compiler = HostCompiler::new(registry());
        let source = KernelSource::new("k.cl", "__kernel void fill(__global int* a) {}\n__kernel void missing(void) {}");
        let device = DeviceInfo::from_spec(&DeviceSpec::gpu("G"));

        let build = compiler
            .compile(&source, &device, &BuildOptions::default())
            .unwrap();
        assert_eq!(build.status, BuildStatus::Error);
        assert!(build.log.contains("k.cl:2: error: no implementation for kernel 'missing'"));
    }

    #[test]
    fn test_extension_requirement_is_per_device() {
        let compiler = HostCompiler::new(registry());
        let source = KernelSource::new("count.cl", "__kernel void count(__global int* c) {}");
        let with_atomics = DeviceInfo::from_spec(
            &DeviceSpec::gpu("A").extension("cl_khr_global_int32_base_atomics"),
        );
        let without = DeviceInfo::from_spec(&DeviceSpec::cpu("B"));

        let ok = compiler
            .compile(&source, &with_atomics, &BuildOptions::default())
            .unwrap();
        assert_eq!(ok.status, BuildStatus::Success);
        assert!(ok.kernels.contains_key("count"));

        let bad = compiler
            .compile(&source, &without, &BuildOptions::default())
            .unwrap();
        assert_eq!(bad.status, BuildStatus::Error);
        assert!(bad.log.contains("requires extension 'cl_khr_global_int32_base_atomics'"));
    }
}
