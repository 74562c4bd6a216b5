//! Fixed style catalogs and the prompt templates built from them.

const CLASSIC_STYLES: &[(&str, &str)] = &[
    ("Bob", "a chin-length blunt bob with a clean, even edge"),
    ("Pixie Cut", "a short, softly textured pixie cut"),
    ("Long Layers", "long, flowing hair cut into loose layers"),
    ("Curtain Bangs", "shoulder-length hair with face-framing curtain bangs"),
    ("Side Part", "a smooth, neatly combed deep side part"),
    ("Braided Updo", "hair gathered into an elegant braided updo"),
];

const BOLD_STYLES: &[(&str, &str)] = &[
    ("Buzz Cut", "a very short, uniform buzz cut"),
    ("Mohawk", "a tall mohawk with closely shaved sides"),
    ("Mullet", "a modern mullet, short at the front and long in the back"),
    ("Undercut", "a dramatic undercut with long hair swept over one side"),
    ("Space Buns", "two high space buns, one on each side of the head"),
    ("Neon Color", "the current cut dyed a vivid neon color"),
];

/// Which of the two predefined label sets a run generates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StyleCategory {
    Classic,
    Bold,
}

impl StyleCategory {
    pub fn all() -> [StyleCategory; 2] {
        [StyleCategory::Classic, StyleCategory::Bold]
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "classic" => Some(StyleCategory::Classic),
            "bold" => Some(StyleCategory::Bold),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            StyleCategory::Classic => "classic",
            StyleCategory::Bold => "bold",
        }
    }

    pub fn labels(self) -> Vec<&'static str> {
        self.styles().iter().map(|(label, _)| *label).collect()
    }

    fn styles(self) -> &'static [(&'static str, &'static str)] {
        match self {
            StyleCategory::Classic => CLASSIC_STYLES,
            StyleCategory::Bold => BOLD_STYLES,
        }
    }

    fn detail_for(self, label: &str) -> Option<&'static str> {
        self.styles()
            .iter()
            .find(|(name, _)| *name == label)
            .map(|(_, detail)| *detail)
    }
}

/// Builds the primary generation instruction for one label.
pub fn instruction_for(category: StyleCategory, label: &str) -> String {
    let detail = category.detail_for(label).unwrap_or(label);
    format!(
        "Edit this photo so the person has {detail}. This is a {} look. \
         Keep the face, skin tone, expression, clothing, and background \
         exactly as they are; change only the hair.",
        category.name()
    )
}

/// Conservative substitute used when the primary instruction is refused.
///
/// Deliberately plainer wording than [`instruction_for`]: it names only the
/// style and category, nothing about how to edit the photo.
pub fn fallback_instruction(label: &str, category: &str) -> String {
    format!(
        "A portrait photo of the same person with a {label} hairstyle, \
         styled as a {category} look. Keep the person's identity unchanged."
    )
}
