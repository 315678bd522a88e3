//! Password template classes and the character selector.
//!
//! # Purpose
//! Maps each template class to its set of character-pattern templates and
//! renders a password by indexing into per-class character banks with
//! successive bytes of a site key. Byte 0 selects the template; byte `i+1`
//! selects the character for position `i`.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Named password grammar selecting character classes and length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateClass {
    Max,
    Long,
    Medium,
    Short,
    Basic,
    Pin,
}

impl TemplateClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateClass::Max => "max",
            TemplateClass::Long => "long",
            TemplateClass::Medium => "medium",
            TemplateClass::Short => "short",
            TemplateClass::Basic => "basic",
            TemplateClass::Pin => "pin",
        }
    }

    fn templates(&self) -> &'static [&'static str] {
        match self {
            TemplateClass::Max => &["anoxxxxxxxxxxxxxxxxx", "axxxxxxxxxxxxxxxxxno"],
            TemplateClass::Long => &[
                "CvcvnoCvcvCvcv",
                "CvcvCvcvnoCvcv",
                "CvcvCvcvCvcvno",
                "CvccnoCvcvCvcv",
                "CvccCvcvnoCvcv",
                "CvccCvcvCvcvno",
                "CvcvnoCvccCvcv",
                "CvcvCvccnoCvcv",
                "CvcvCvccCvcvno",
                "CvcvnoCvcvCvcc",
                "CvcvCvcvnoCvcc",
                "CvcvCvcvCvccno",
                "CvccnoCvccCvcv",
                "CvccCvccnoCvcv",
                "CvccCvccCvcvno",
                "CvcvnoCvccCvcc",
                "CvcvCvccnoCvcc",
                "CvcvCvccCvccno",
                "CvccnoCvcvCvcc",
                "CvccCvcvnoCvcc",
                "CvccCvcvCvccno",
            ],
            TemplateClass::Medium => &["CvcnoCvc", "CvcCvcno"],
            TemplateClass::Short => &["Cvcn"],
            TemplateClass::Basic => &["aaanaaan", "aannaaan", "aaannaaa"],
            TemplateClass::Pin => &["nnnn"],
        }
    }
}

impl fmt::Display for TemplateClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TemplateClass {
    type Err = UnknownTemplate;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "max" => Ok(TemplateClass::Max),
            "long" => Ok(TemplateClass::Long),
            "medium" => Ok(TemplateClass::Medium),
            "short" => Ok(TemplateClass::Short),
            "basic" => Ok(TemplateClass::Basic),
            "pin" => Ok(TemplateClass::Pin),
            _ => Err(UnknownTemplate(value.to_string())),
        }
    }
}

/// Error for tokens outside the closed template set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownTemplate(pub String);

impl fmt::Display for UnknownTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown template class: {}", self.0)
    }
}

impl std::error::Error for UnknownTemplate {}

fn char_bank(class: char) -> &'static str {
    match class {
        'V' => "AEIOU",
        'C' => "BCDFGHJKLMNPQRSTVWXYZ",
        'v' => "aeiou",
        'c' => "bcdfghjklmnpqrstvwxyz",
        'A' => "AEIOUBCDFGHJKLMNPQRSTVWXYZ",
        'a' => "AEIOUaeiouBCDFGHJKLMNPQRSTVWXYZbcdfghjklmnpqrstvwxyz",
        'n' => "0123456789",
        'o' => "@&%?,=[]_:-+*$#!'^~;()/.",
        'x' => "AEIOUaeiouBCDFGHJKLMNPQRSTVWXYZbcdfghjklmnpqrstvwxyz0123456789!@#$%^&*()",
        other => unreachable!("template character class {other} is not part of any template"),
    }
}

/// Render a deterministic password for the given class from a site key.
pub fn site_password(site_key: &[u8; 64], class: TemplateClass) -> String {
    let templates = class.templates();
    let template = templates[site_key[0] as usize % templates.len()];

    template
        .chars()
        .enumerate()
        .map(|(position, class_char)| {
            let bank = char_bank(class_char).as_bytes();
            bank[site_key[position + 1] as usize % bank.len()] as char
        })
        .collect()
}
