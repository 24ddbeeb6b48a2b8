//! Output locations for one specification file.
//!
//! Everything lands under `<report>/<execution-id>/<relative-dir>/`, where
//! `<relative-dir>` mirrors the specification's directory below the test root.

use std::path::{Path, PathBuf};

use crate::engine::ProgramKind;
use crate::resolver::absolute_path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLayout {
    /// Specification path relative to the test root
    relative_source: PathBuf,
    output_dir: PathBuf,
    name: String,
}

impl FileLayout {
    /// `test_root` and `spec` are compared in absolute form, so a relative
    /// path below an absolute root still keeps its directories
    pub fn new(test_root: &Path, report_root: &Path, execution_id: &str, spec: &Path) -> Self {
        let relative_source = absolute_path(spec)
            .strip_prefix(absolute_path(test_root))
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| spec.file_name().map(PathBuf::from).unwrap_or_default());

        let mut output_dir = report_root.join(execution_id);
        if let Some(parent) = relative_source
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
        {
            output_dir.push(parent);
        }

        let name = spec
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "xspec".to_string());

        Self {
            relative_source,
            output_dir,
            name,
        }
    }

    pub fn relative_source(&self) -> &Path {
        &self.relative_source
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// File stem of the specification
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `<kind>/<name>.xslt` or `<kind>/<name>.xquery`
    pub fn compiled(&self, kind: ProgramKind) -> PathBuf {
        self.output_dir
            .join(kind.as_str())
            .join(format!("{}.{}", self.name, kind.as_str()))
    }

    pub fn xml_report(&self) -> PathBuf {
        self.output_dir.join(format!("{}.xml", self.name))
    }

    pub fn html_report(&self) -> PathBuf {
        self.output_dir.join(format!("{}.html", self.name))
    }

    pub fn junit_report(&self) -> PathBuf {
        self.output_dir.join(format!("junit-{}.xml", self.name))
    }

    pub fn coverage_trace(&self) -> PathBuf {
        self.output_dir.join(format!("coverage-{}.xml", self.name))
    }

    pub fn coverage_report(&self) -> PathBuf {
        self.output_dir.join(format!("{}-coverage.html", self.name))
    }

    pub fn schematron_dir(&self) -> PathBuf {
        self.output_dir.join("schematron")
    }

    pub fn compiled_schematron(&self) -> PathBuf {
        self.schematron_dir()
            .join(format!("{}-sch-compiled.xsl", self.name))
    }

    /// The rewritten specification; it keeps the original stem so its
    /// reports land where the original's would
    pub fn rewritten_spec(&self) -> PathBuf {
        self.schematron_dir().join(format!("{}-compiled.xspec", self.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_mirror_relative_directory() {
        let layout = FileLayout::new(
            Path::new("/project/tests"),
            Path::new("/project/target/xspec-reports"),
            "run-1",
            Path::new("/project/tests/suite/math.xspec"),
        );
        let base = Path::new("/project/target/xspec-reports/run-1/suite");

        assert_eq!(layout.relative_source(), Path::new("suite/math.xspec"));
        assert_eq!(layout.name(), "math");
        assert_eq!(layout.compiled(ProgramKind::Xslt), base.join("xslt/math.xslt"));
        assert_eq!(layout.compiled(ProgramKind::XQuery), base.join("xquery/math.xquery"));
        assert_eq!(layout.xml_report(), base.join("math.xml"));
        assert_eq!(layout.html_report(), base.join("math.html"));
        assert_eq!(layout.junit_report(), base.join("junit-math.xml"));
        assert_eq!(layout.coverage_trace(), base.join("coverage-math.xml"));
        assert_eq!(layout.coverage_report(), base.join("math-coverage.html"));
        assert_eq!(
            layout.compiled_schematron(),
            base.join("schematron/math-sch-compiled.xsl")
        );
        assert_eq!(layout.rewritten_spec(), base.join("schematron/math-compiled.xspec"));
    }

    #[test]
    fn test_spec_outside_test_root() {
        let layout = FileLayout::new(
            Path::new("/project/tests"),
            Path::new("/reports"),
            "run",
            Path::new("/elsewhere/lonely.xspec"),
        );
        assert_eq!(layout.relative_source(), Path::new("lonely.xspec"));
        assert_eq!(layout.xml_report(), PathBuf::from("/reports/run/lonely.xml"));
    }

    #[test]
    fn test_relative_specs_under_absolute_root_keep_their_directories() {
        let cwd = std::env::current_dir().unwrap();
        let first = FileLayout::new(&cwd, Path::new("/reports"), "run", Path::new("suite1/a.xspec"));
        let second = FileLayout::new(&cwd, Path::new("/reports"), "run", Path::new("suite2/a.xspec"));

        assert_eq!(first.relative_source(), Path::new("suite1/a.xspec"));
        assert_eq!(second.relative_source(), Path::new("suite2/a.xspec"));
        assert_eq!(first.xml_report(), PathBuf::from("/reports/run/suite1/a.xml"));
        assert_ne!(first.xml_report(), second.xml_report());
        assert_ne!(first.compiled(ProgramKind::Xslt), second.compiled(ProgramKind::Xslt));
    }

    #[test]
    fn test_absolute_spec_under_relative_root() {
        let cwd = std::env::current_dir().unwrap();
        let layout = FileLayout::new(
            Path::new("."),
            Path::new("/reports"),
            "run",
            &cwd.join("nested/dir/b.xspec"),
        );
        assert_eq!(layout.relative_source(), Path::new("nested/dir/b.xspec"));
        assert_eq!(layout.junit_report(), PathBuf::from("/reports/run/nested/dir/junit-b.xml"));
    }
}
