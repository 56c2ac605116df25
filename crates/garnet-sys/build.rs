use std::env;
use std::path::PathBuf;
use std::process::Command;

/// RbConfig keys queried from the target interpreter, in output order.
const RBCONFIG_KEYS: &[&str] = &[
    "rubyhdrdir",
    "rubyarchhdrdir",
    "libdir",
    "RUBY_SO_NAME",
    "ENABLE_SHARED",
    "LIBRUBY_A",
    "LIBS",
    "RUBY_PROGRAM_VERSION",
];

struct RbConfig {
    hdr_dir: PathBuf,
    arch_hdr_dir: PathBuf,
    lib_dir: PathBuf,
    so_name: String,
    enable_shared: bool,
    static_lib: String,
    libs: String,
    version: String,
}

fn main() {
    println!("cargo:rerun-if-env-changed=GARNET_RUBY");
    println!("cargo:rerun-if-env-changed=RUBY");
    println!("cargo:rerun-if-env-changed=GARNET_RUBY_STATIC");
    println!("cargo:rerun-if-changed=src/shim.c");

    let target_os = env::var("CARGO_CFG_TARGET_OS").unwrap();

    let ruby = env::var("GARNET_RUBY")
        .or_else(|_| env::var("RUBY"))
        .unwrap_or_else(|_| "ruby".to_string());
    let config = query_rbconfig(&ruby);

    println!(
        "cargo:warning=Linking against Ruby {} ({})",
        config.version,
        config.lib_dir.display()
    );

    // The shim must be emitted before libruby so the linker resolves its
    // references against the runtime library that follows it.
    compile_shim(&config);

    match target_os.as_str() {
        "linux" | "macos" | "freebsd" => link_libruby(&config, &target_os),
        _ => panic!("Unsupported OS for embedded Ruby: {}", target_os),
    }

    println!("cargo:libdir={}", config.lib_dir.display());
    println!("cargo:version={}", config.version);
}

fn query_rbconfig(ruby: &str) -> RbConfig {
    let script = format!(
        "print RbConfig::CONFIG.values_at({}).map(&:to_s).join(\"\\n\")",
        RBCONFIG_KEYS
            .iter()
            .map(|k| format!("{:?}", k))
            .collect::<Vec<_>>()
            .join(", ")
    );

    let output = Command::new(ruby)
        .args(["-rrbconfig", "-e", &script])
        .output()
        .unwrap_or_else(|e| {
            panic!(
                "Failed to run `{}`: {}. Set GARNET_RUBY to the interpreter to embed.",
                ruby, e
            )
        });

    if !output.status.success() {
        panic!(
            "`{}` failed to report RbConfig: {}",
            ruby,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let mut values = stdout.split('\n').map(str::to_string);
    let mut next = || values.next().unwrap_or_default();

    RbConfig {
        hdr_dir: PathBuf::from(next()),
        arch_hdr_dir: PathBuf::from(next()),
        lib_dir: PathBuf::from(next()),
        so_name: next(),
        enable_shared: next() == "yes",
        static_lib: next(),
        libs: next(),
        version: next(),
    }
}

fn compile_shim(config: &RbConfig) {
    cc::Build::new()
        .file("src/shim.c")
        .include(&config.hdr_dir)
        .include(&config.arch_hdr_dir)
        .warnings(false)
        .compile("garnet_shim");
}

fn link_libruby(config: &RbConfig, target_os: &str) {
    println!("cargo:rustc-link-search=native={}", config.lib_dir.display());

    let want_static = env::var("GARNET_RUBY_STATIC").is_ok_and(|v| v == "1");

    if want_static || !config.enable_shared {
        let archive = static_lib_name(&config.static_lib)
            .unwrap_or_else(|| panic!("Ruby has no static library (LIBRUBY_A is empty)"));
        println!("cargo:rustc-link-lib=static={}", archive);

        // libruby.a leaves its system dependencies unresolved
        for lib in config.libs.split_whitespace() {
            if let Some(name) = lib.strip_prefix("-l") {
                println!("cargo:rustc-link-lib={}", name);
            }
        }
    } else {
        println!("cargo:rustc-link-lib=dylib={}", config.so_name);
    }

    if target_os == "linux" {
        println!("cargo:rustc-link-lib=m");
        println!("cargo:rustc-link-lib=pthread");
        println!("cargo:rustc-link-lib=dl");
    }
}

/// `libruby-static.a` -> `ruby-static`
fn static_lib_name(archive: &str) -> Option<String> {
    let stem = archive.strip_suffix(".a")?;
    let name = stem.strip_prefix("lib").unwrap_or(stem);
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}
