use std::fmt;
use std::str::FromStr;

/// An error returned for unknown or invalid [`Language`] names.
#[derive(Debug)]
pub struct UnknownLanguageError;

impl fmt::Display for UnknownLanguageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown language")
    }
}

impl std::error::Error for UnknownLanguageError {}

/// The source language of a compilation unit or symbol.
///
/// Debug records do not always carry an explicit language tag; most of the
/// time the language is deduced from the source filename suffix via
/// [`Language::from_filename`]. Parsers upgrade a unit's language
/// monotonically and never downgrade from `Cpp` to `C` (inline headers
/// included from C++ units would otherwise flip the unit back).
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Language {
    /// The language could not be determined.
    #[default]
    Unknown,
    /// ANSI or K&R C.
    C,
    /// C++ in any of its dialects.
    Cpp,
    /// Objective-C.
    ObjC,
    /// Fortran 77 through modern Fortran.
    Fortran,
    /// Pascal.
    Pascal,
    /// Ada.
    Ada,
    /// Modula-2.
    Modula2,
    /// Assembler sources.
    Asm,
}

impl Language {
    /// Returns the name of the language.
    pub fn name(self) -> &'static str {
        match self {
            Language::Unknown => "unknown",
            Language::C => "c",
            Language::Cpp => "c++",
            Language::ObjC => "objective-c",
            Language::Fortran => "fortran",
            Language::Pascal => "pascal",
            Language::Ada => "ada",
            Language::Modula2 => "modula-2",
            Language::Asm => "asm",
        }
    }

    /// Deduces the language from a source filename suffix.
    ///
    /// Returns `Language::Unknown` for unrecognized suffixes, including
    /// header files compiled into their including unit (`.h` is claimed by
    /// both C and C++, so no deduction is made for it).
    pub fn from_filename(filename: &str) -> Language {
        let ext = match filename.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => ext,
            _ => return Language::Unknown,
        };

        match ext {
            "c" | "i" => Language::C,
            "C" | "cc" | "cp" | "cpp" | "cxx" | "c++" | "ii" => Language::Cpp,
            "m" => Language::ObjC,
            "f" | "F" | "for" | "FOR" | "ftn" | "FTN" | "fpp" | "FPP" | "f90" | "F90" | "f95"
            | "F95" | "f03" | "F03" | "f08" | "F08" => Language::Fortran,
            "p" | "pas" => Language::Pascal,
            "ada" | "adb" | "ads" => Language::Ada,
            "mod" | "m2" => Language::Modula2,
            "s" | "S" | "sx" => Language::Asm,
            _ => Language::Unknown,
        }
    }

    /// Applies the monotonic language-upgrade rule to a unit language.
    ///
    /// Returns the new unit language given a freshly deduced one. An
    /// `Unknown` deduction never changes anything, and `C` never replaces
    /// `Cpp`.
    pub fn upgrade(self, deduced: Language) -> Language {
        if deduced == Language::Unknown {
            self
        } else if deduced == Language::C && self == Language::Cpp {
            self
        } else {
            deduced
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Language {
    type Err = UnknownLanguageError;

    fn from_str(string: &str) -> Result<Language, UnknownLanguageError> {
        Ok(match string {
            "unknown" => Language::Unknown,
            "c" => Language::C,
            "c++" => Language::Cpp,
            "objective-c" => Language::ObjC,
            "fortran" => Language::Fortran,
            "pascal" => Language::Pascal,
            "ada" => Language::Ada,
            "modula-2" => Language::Modula2,
            "asm" => Language::Asm,
            _ => return Err(UnknownLanguageError),
        })
    }
}

/// An address exactly as it appears in the debug records, before the
/// enclosing object file's section offset has been applied.
///
/// Every address stored in a partial symbol or partial symtab is
/// unrelocated; clients obtain a runtime address by calling
/// [`UnrelocatedAddr::offset`] with the matching section delta.
#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct UnrelocatedAddr(pub u64);

impl UnrelocatedAddr {
    /// The raw address value.
    pub fn raw(self) -> u64 {
        self.0
    }

    /// Applies a section offset, yielding a runtime address.
    pub fn offset(self, delta: u64) -> u64 {
        self.0.wrapping_add(delta)
    }
}

impl fmt::Debug for UnrelocatedAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Display for UnrelocatedAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<u64> for UnrelocatedAddr {
    fn from(value: u64) -> Self {
        UnrelocatedAddr(value)
    }
}

/// Helper macro to implement string based serialization and deserialization.
///
/// If a type implements `FromStr` and `Display` then this automatically
/// implements a serializer/deserializer for that type that dispatches
/// appropriately.
#[macro_export]
macro_rules! impl_str_serde {
    ($type:ty) => {
        impl ::serde::ser::Serialize for $type {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: ::serde::ser::Serializer,
            {
                serializer.serialize_str(self.name())
            }
        }

        impl<'de> ::serde::de::Deserialize<'de> for $type {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: ::serde::de::Deserializer<'de>,
            {
                <::std::borrow::Cow<'_, str>>::deserialize(deserializer)?
                    .parse()
                    .map_err(::serde::de::Error::custom)
            }
        }
    };
}

impl_str_serde!(Language);
