use std::path::{Path, PathBuf};

/// File names and compiler invocation for C++ submissions.
#[derive(Debug, Clone)]
pub struct Toolchain {
    pub source_name: &'static str,
    pub binary_name: &'static str,
    pub compiler: &'static str,
    pub flags: &'static [&'static str],
}

impl Toolchain {
    pub fn cpp() -> Self {
        Self {
            source_name: "submission.cpp",
            binary_name: "submission.out",
            compiler: "g++",
            flags: &["-std=c++17", "-O2"],
        }
    }

    /// Arguments after the compiler name, relative to the working directory.
    pub fn compile_args(&self) -> Vec<String> {
        let mut args: Vec<String> = self.flags.iter().map(ToString::to_string).collect();
        args.extend([
            "-o".to_string(),
            self.binary_name.to_string(),
            self.source_name.to_string(),
        ]);
        args
    }

    pub fn source_path(&self, work_dir: &Path) -> PathBuf {
        work_dir.join(self.source_name)
    }
}
