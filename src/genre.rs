//! Free-text genre tokens to the fixed set of browsable categories.

use std::collections::BTreeMap;

use crate::models::Trailer;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Category {
    Horror,
    Comedy,
    Action,
    Crime,
    Drama,
    Romance,
    Animation,
    Family,
    SciFi,
    Musical,
    Documentary,
    Thriller,
}

impl Category {
    pub const ALL: [Category; 12] = [
        Category::Horror,
        Category::Comedy,
        Category::Action,
        Category::Crime,
        Category::Drama,
        Category::Romance,
        Category::Animation,
        Category::Family,
        Category::SciFi,
        Category::Musical,
        Category::Documentary,
        Category::Thriller,
    ];

    pub fn slug(self) -> &'static str {
        match self {
            Category::Horror => "horror",
            Category::Comedy => "comedy",
            Category::Action => "action",
            Category::Crime => "crime",
            Category::Drama => "drama",
            Category::Romance => "romance",
            Category::Animation => "animation",
            Category::Family => "family",
            Category::SciFi => "scifi",
            Category::Musical => "musical",
            Category::Documentary => "documentary",
            Category::Thriller => "thriller",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Category::SciFi => "Sci-Fi",
            Category::Horror => "Horror",
            Category::Comedy => "Comedy",
            Category::Action => "Action",
            Category::Crime => "Crime",
            Category::Drama => "Drama",
            Category::Romance => "Romance",
            Category::Animation => "Animation",
            Category::Family => "Family",
            Category::Musical => "Musical",
            Category::Documentary => "Documentary",
            Category::Thriller => "Thriller",
        }
    }

    /// Resolve a category from a URL slug; accepts the same synonyms as
    /// [`normalize_genre`] so `/category/sci-fi` keeps working.
    pub fn from_slug(slug: &str) -> Option<Self> {
        normalize_genre(&slug.replace('-', " ")).or_else(|| normalize_genre(slug))
    }
}

/// Map one genre token to its canonical category. Unknown tokens yield `None`.
pub fn normalize_genre(token: &str) -> Option<Category> {
    let token = token
        .trim()
        .to_lowercase()
        .replace(['_', '\u{2013}', '\u{2014}'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    let category = match token.as_str() {
        "horror" | "horrors" => Category::Horror,
        "comedy" | "comedies" | "comedic" => Category::Comedy,
        "action" => Category::Action,
        "crime" | "crimes" => Category::Crime,
        "drama" | "dramas" | "dramatic" => Category::Drama,
        "romance" | "romances" | "romantic" => Category::Romance,
        "animation" | "animated" | "animations" => Category::Animation,
        "family" | "families" => Category::Family,
        "sci-fi" | "sci fi" | "scifi" | "sf" | "science fiction" | "science-fiction" => {
            Category::SciFi
        },
        "musical" | "musicals" | "music" => Category::Musical,
        "documentary" | "documentaries" | "doc" | "docs" => Category::Documentary,
        "thriller" | "thrillers" | "suspense" => Category::Thriller,
        _ => return None,
    };
    Some(category)
}

/// Every category named by a comma-separated genre field, without duplicates,
/// in canonical order.
pub fn categories_of(field: &str) -> Vec<Category> {
    let mut out: Vec<Category> = field.split(',').filter_map(normalize_genre).collect();
    out.sort();
    out.dedup();
    out
}

/// Bucket trailers by the categories of their genre field. A trailer can sit
/// in several buckets; trailers with no recognized genre are left out.
pub fn group_by_category(trailers: &[Trailer]) -> BTreeMap<Category, Vec<Trailer>> {
    let mut groups: BTreeMap<Category, Vec<Trailer>> = BTreeMap::new();
    for trailer in trailers {
        for category in categories_of(&trailer.category) {
            groups.entry(category).or_default().push(trailer.clone());
        }
    }
    groups
}
