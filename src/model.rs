// Shared data types for the boundary engine: the primary key (`Signature`),
// its file component (`FileRef`), and the records a metadata artifact
// deserializes into (`FunctionRecord`, `VarRecord`, `Edge`, `StructMeta`,
// `MetadataRecord`).

use fxhash::FxHashMap;
use serde::de::{Deserializer, Error as DeError};
use serde::ser::{SerializeTuple, Serializer};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// The file component of a `Signature`. `'?'` in the source metadata means
/// "not yet known which file this symbol comes from"; we model that as a
/// variant rather than carrying the sentinel string through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FileRef {
    Resolved(PathBuf),
    Unresolved,
}

impl FileRef {
    pub fn from_raw(raw: &str) -> FileRef {
        if raw == "?" {
            FileRef::Unresolved
        } else {
            FileRef::Resolved(PathBuf::from(raw))
        }
    }

    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            FileRef::Resolved(p) => Some(p.as_path()),
            FileRef::Unresolved => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, FileRef::Resolved(_))
    }
}

impl std::fmt::Display for FileRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileRef::Resolved(p) => write!(f, "{}", p.display()),
            FileRef::Unresolved => write!(f, "?"),
        }
    }
}

impl Serialize for FileRef {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for FileRef {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(d)?;
        Ok(FileRef::from_raw(&raw))
    }
}

/// The primary key for every function: a (name, file) pair. Two signatures
/// are equal iff both components are equal; `static` functions may repeat
/// the same name across distinct files, hence `file` is part of the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Signature {
    pub name: Box<str>,
    pub file: FileRef,
}

impl Signature {
    pub fn new(name: impl Into<Box<str>>, file: FileRef) -> Signature {
        Signature {
            name: name.into(),
            file,
        }
    }

    pub fn resolved(name: impl Into<Box<str>>, file: PathBuf) -> Signature {
        Signature::new(name, FileRef::Resolved(file))
    }

    pub fn unresolved(name: impl Into<Box<str>>) -> Signature {
        Signature::new(name, FileRef::Unresolved)
    }
}

impl std::fmt::Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.name, self.file)
    }
}

// Signatures travel over the wire as a 2-element array `[name, file]`,
// matching the compiler plugin's `(decl.name, file)` tuples.
impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        let mut t = s.serialize_tuple(2)?;
        t.serialize_element(&self.name)?;
        t.serialize_element(&self.file)?;
        t.end()
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let (name, file): (String, String) = Deserialize::deserialize(d)?;
        if name.is_empty() {
            return Err(D::Error::custom("signature name must not be empty"));
        }
        Ok(Signature::new(name, FileRef::from_raw(&file)))
    }
}

/// The `{fn, ret, params}` triple emitted for functions whose file makes
/// them candidates for `extern` declaration (module and sidecar sources).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeclStr {
    #[serde(rename = "fn")]
    pub fn_name: String,
    pub ret: String,
    pub params: String,
}

/// Per-file metadata for one function definition.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FunctionRecord {
    pub name: Box<str>,
    pub file: PathBuf,
    pub l_brace_loc: (u32, u32),
    pub r_brace_loc: (u32, u32),
    pub name_loc: (u32, u32),
    pub external: bool,
    pub public: bool,
    #[serde(rename = "static")]
    pub is_static: bool,
    pub inline: bool,
    pub weak: bool,
    pub init: bool,
    #[serde(default)]
    pub decl_str: Option<DeclStr>,
}

impl FunctionRecord {
    pub fn signature(&self) -> Signature {
        Signature::resolved(self.name.clone(), self.file.clone())
    }
}

/// Per-file metadata for one global variable declaration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VarRecord {
    pub name: Box<str>,
    pub file: PathBuf,
    pub name_loc: (u32, u32),
    pub decl_start_line: u32,
    pub external: bool,
    pub public: bool,
    #[serde(rename = "static")]
    pub is_static: bool,
    #[serde(default)]
    pub decl_str: Option<String>,
}

/// A directed call-graph edge. `to.file` may be `FileRef::Unresolved`
/// pre-resolution; edges referencing names the link resolver can never
/// pin down (compiler intrinsics, assembly thunks) are dropped in C2.
#[derive(Debug, Clone, Deserialize)]
pub struct Edge {
    pub from: Signature,
    pub to: Signature,
}

/// A struct's field universe and who (`Signature`) touches each field,
/// restricted to a single translation unit's view.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StructMeta {
    #[serde(default)]
    pub all_fields: Vec<String>,
    #[serde(default)]
    pub public_fields: FxHashMap<String, Vec<Signature>>,
}

/// One `*.boundary` artifact: everything the compiler plugin observed
/// while compiling a single translation unit.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetadataRecord {
    #[serde(rename = "fn", default)]
    pub functions: Vec<FunctionRecord>,
    #[serde(default)]
    pub var: Vec<VarRecord>,
    #[serde(default)]
    pub edge: Vec<Edge>,
    #[serde(default)]
    pub callback: Vec<Signature>,
    #[serde(default)]
    pub interface: Vec<Signature>,
    #[serde(rename = "struct", default)]
    pub structs: FxHashMap<String, StructMeta>,
}
