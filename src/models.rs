use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub is_email_verified: bool,
    pub otp_hash: Option<String>,
    pub otp_expires: Option<DateTime<Utc>>,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub generate_counts: LanguageCounts,
    pub refactor_counts: LanguageCounts,
    pub run_counts: LanguageCounts,
    pub shared_links: Vec<SharedLink>,
}

impl User {
    /// A fresh, unverified account.
    pub fn new(username: String, email: String, password_hash: String, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            username,
            email,
            password_hash,
            is_email_verified: false,
            otp_hash: None,
            otp_expires: None,
            last_login: Some(now),
            created_at: now,
            generate_counts: LanguageCounts::default(),
            refactor_counts: LanguageCounts::default(),
            run_counts: LanguageCounts::default(),
            shared_links: Vec::new(),
        }
    }

    pub fn has_shared_link(&self, share_id: &str) -> bool {
        self.shared_links.iter().any(|link| link.share_id == share_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedLink {
    pub share_id: String,
    pub title: String,
    pub expiry_time: DateTime<Utc>,
}

/// Languages a usage counter can be kept for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Python,
    JavaScript,
    HtmlJsCss,
    C,
    Cpp,
    Java,
    CSharp,
    Rust,
    Go,
    Verilog,
    Sql,
    MongoDb,
    Swift,
    Ruby,
    TypeScript,
    Dart,
    Kotlin,
    Perl,
    Scala,
    Julia,
}

impl Language {
    /// Parses the tag the editor sends. Unknown tags yield `None`.
    pub fn from_tag(tag: &str) -> Option<Self> {
        let lang = match tag {
            "python" => Self::Python,
            "javascript" => Self::JavaScript,
            "HtmlJsCss" => Self::HtmlJsCss,
            "c" => Self::C,
            "cpp" => Self::Cpp,
            "java" => Self::Java,
            "csharp" => Self::CSharp,
            "rust" => Self::Rust,
            "go" => Self::Go,
            "verilog" => Self::Verilog,
            "sql" => Self::Sql,
            "mongodb" => Self::MongoDb,
            "swift" => Self::Swift,
            "ruby" => Self::Ruby,
            "typescript" => Self::TypeScript,
            "dart" => Self::Dart,
            "kotlin" => Self::Kotlin,
            "perl" => Self::Perl,
            "scala" => Self::Scala,
            "julia" => Self::Julia,
            _ => return None,
        };
        Some(lang)
    }
}

/// Per-language tally. Field names on the wire are the short storage keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LanguageCounts {
    pub py: u32,
    pub js: u32,
    #[serde(rename = "HtmlJsCss")]
    pub html_js_css: u32,
    pub c: u32,
    pub cpp: u32,
    pub java: u32,
    pub cs: u32,
    pub rust: u32,
    pub go: u32,
    pub verilog: u32,
    pub sql: u32,
    pub mongodb: u32,
    pub swift: u32,
    pub ruby: u32,
    pub ts: u32,
    pub dart: u32,
    pub kt: u32,
    pub perl: u32,
    pub scala: u32,
    pub julia: u32,
}

impl LanguageCounts {
    pub fn get(&self, lang: Language) -> u32 {
        let mut copy = *self;
        *copy.slot(lang)
    }

    pub fn increment(&mut self, lang: Language) {
        let slot = self.slot(lang);
        *slot = slot.saturating_add(1);
    }

    fn slot(&mut self, lang: Language) -> &mut u32 {
        match lang {
            Language::Python => &mut self.py,
            Language::JavaScript => &mut self.js,
            Language::HtmlJsCss => &mut self.html_js_css,
            Language::C => &mut self.c,
            Language::Cpp => &mut self.cpp,
            Language::Java => &mut self.java,
            Language::CSharp => &mut self.cs,
            Language::Rust => &mut self.rust,
            Language::Go => &mut self.go,
            Language::Verilog => &mut self.verilog,
            Language::Sql => &mut self.sql,
            Language::MongoDb => &mut self.mongodb,
            Language::Swift => &mut self.swift,
            Language::Ruby => &mut self.ruby,
            Language::TypeScript => &mut self.ts,
            Language::Dart => &mut self.dart,
            Language::Kotlin => &mut self.kt,
            Language::Perl => &mut self.perl,
            Language::Scala => &mut self.scala,
            Language::Julia => &mut self.julia,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterKind {
    Generate,
    Refactor,
    Run,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionType {
    Create,
    Update,
    Delete,
}

impl ActionType {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionType::Create => "create",
            ActionType::Update => "update",
            ActionType::Delete => "delete",
        }
    }
}
