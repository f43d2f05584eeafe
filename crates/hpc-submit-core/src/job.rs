//! Job descriptors and job sets.

use std::path::{Component, Path, PathBuf};

use crate::error::{SubmitError, SubmitResult};

/// File arity of a module's work unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputShape {
    /// One input file.
    Single,
    /// A fixed pair of files (e.g. input and geometry).
    Pair,
    /// A control file and a coordinate file; the job runs in the control
    /// file's directory.
    DirectoryPair,
    /// A primary file followed by `trailing` optional files.
    Tuple { trailing: usize },
}

impl InputShape {
    /// Number of manifest fields a record of this shape occupies.
    pub fn field_count(self) -> usize {
        match self {
            InputShape::Single => 1,
            InputShape::Pair | InputShape::DirectoryPair => 2,
            InputShape::Tuple { trailing } => 1 + trailing,
        }
    }
}

/// Absolute input paths of one work unit, tagged by arity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobInputs {
    Single(PathBuf),
    Pair(PathBuf, PathBuf),
    DirectoryPair { control: PathBuf, coord: PathBuf },
    Tuple {
        primary: PathBuf,
        trailing: Vec<Option<PathBuf>>,
    },
}

impl JobInputs {
    pub fn shape(&self) -> InputShape {
        match self {
            JobInputs::Single(_) => InputShape::Single,
            JobInputs::Pair(..) => InputShape::Pair,
            JobInputs::DirectoryPair { .. } => InputShape::DirectoryPair,
            JobInputs::Tuple { trailing, .. } => InputShape::Tuple {
                trailing: trailing.len(),
            },
        }
    }

    /// The file that names the job.
    pub fn primary(&self) -> &Path {
        match self {
            JobInputs::Single(path) => path,
            JobInputs::Pair(first, _) => first,
            JobInputs::DirectoryPair { control, .. } => control,
            JobInputs::Tuple { primary, .. } => primary,
        }
    }

    /// Fields in manifest order. Absent optional files are empty strings.
    pub fn fields(&self) -> Vec<String> {
        fn text(p: &Path) -> String {
            p.to_string_lossy().into_owned()
        }

        match self {
            JobInputs::Single(path) => vec![text(path)],
            JobInputs::Pair(first, second) => vec![text(first), text(second)],
            JobInputs::DirectoryPair { control, coord } => vec![text(control), text(coord)],
            JobInputs::Tuple { primary, trailing } => std::iter::once(text(primary))
                .chain(
                    trailing
                        .iter()
                        .map(|p| p.as_deref().map(text).unwrap_or_default()),
                )
                .collect(),
        }
    }

    /// Rebuild inputs from manifest fields. Returns `None` when the field
    /// count does not fit the shape or a required field is empty.
    pub fn from_fields(shape: InputShape, fields: &[&str]) -> Option<Self> {
        fn required(s: &str) -> Option<PathBuf> {
            (!s.is_empty()).then(|| PathBuf::from(s))
        }

        match shape {
            InputShape::Single => match fields {
                [path] => Some(JobInputs::Single(required(path)?)),
                _ => None,
            },
            InputShape::Pair => match fields {
                [first, second] => Some(JobInputs::Pair(required(first)?, required(second)?)),
                _ => None,
            },
            InputShape::DirectoryPair => match fields {
                [control, coord] => Some(JobInputs::DirectoryPair {
                    control: required(control)?,
                    coord: required(coord)?,
                }),
                _ => None,
            },
            InputShape::Tuple { trailing } => {
                let (primary, rest) = fields.split_first()?;
                if rest.len() > trailing {
                    return None;
                }
                let mut optional: Vec<Option<PathBuf>> =
                    rest.iter().map(|s| required(s)).collect();
                optional.resize(trailing, None);
                Some(JobInputs::Tuple {
                    primary: required(primary)?,
                    trailing: optional,
                })
            }
        }
    }
}

/// One work unit: its inputs and the stem used to name its outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDescriptor {
    pub inputs: JobInputs,
    pub stem: String,
}

/// Whether the run is one job or a job array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobMode {
    Single,
    Array,
}

/// Ordered work units. Array mode holds exactly when there is more than one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSet {
    jobs: Vec<JobDescriptor>,
}

impl JobSet {
    pub fn new(jobs: Vec<JobDescriptor>) -> SubmitResult<Self> {
        if jobs.is_empty() {
            return Err(SubmitError::usage("No jobs assembled (check inputs)"));
        }
        Ok(Self { jobs })
    }

    pub fn mode(&self) -> JobMode {
        if self.jobs.len() > 1 {
            JobMode::Array
        } else {
            JobMode::Single
        }
    }

    pub fn is_array(&self) -> bool {
        self.mode() == JobMode::Array
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn jobs(&self) -> &[JobDescriptor] {
        &self.jobs
    }

    /// The first job; the only one in single mode.
    pub fn first(&self) -> &JobDescriptor {
        &self.jobs[0]
    }
}

/// Positional inputs and manifest handed to job-set construction.
#[derive(Debug, Clone, Copy)]
pub struct JobRequest<'a> {
    pub positional: &'a [String],
    pub manifest: Option<&'a Path>,
    /// Directory relative paths are resolved against.
    pub work_dir: &'a Path,
}

impl JobRequest<'_> {
    /// Absolute form of `token`, without touching the filesystem.
    pub fn absolute(&self, token: &str) -> PathBuf {
        absolutize(self.work_dir, Path::new(token))
    }

    /// Absolute form of `token`, which must name an existing file.
    pub fn existing_file(&self, token: &str) -> SubmitResult<PathBuf> {
        let path = self.absolute(token);
        if !path.is_file() {
            return Err(SubmitError::InputNotFound(PathBuf::from(token)));
        }
        Ok(path)
    }
}

/// Join `path` onto `base` unless already absolute, dropping `.` components.
pub fn absolutize(base: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };
    joined
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

/// File name of `path` with the first matching extension removed.
pub fn strip_extension(path: &Path, extensions: &[&str]) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stripped = extensions.iter().find_map(|ext| {
        name.strip_suffix(*ext)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    });
    stripped.unwrap_or(name)
}

/// File name of `path` without its last extension.
pub fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}
