//! A parsed game: ordered tag pairs plus the move tree

use super::tree::MoveTree;

/// Tag pairs in the order they were read. Setting an existing tag keeps its
/// position; new tags are appended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    tags: Vec<(String, String)>,
}

impl Headers {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.tags.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = value,
            None => self.tags.push((name.to_string(), value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.tags.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Game {
    pub headers: Headers,
    pub tree: MoveTree,
}

impl Game {
    pub fn new(headers: Headers, tree: MoveTree) -> Self {
        Game { headers, tree }
    }

    /// Game result token, `*` when unknown
    pub fn result(&self) -> &str {
        match self.headers.get("Result") {
            Some(r @ ("1-0" | "0-1" | "1/2-1/2")) => r,
            _ => "*",
        }
    }

    /// Number of half-moves on the mainline
    pub fn ply_count(&self) -> usize {
        self.tree.mainline().len()
    }

    /// Returns a display-friendly summary
    pub fn summary(&self) -> String {
        let white = self.headers.get("White").unwrap_or("Unknown");
        let black = self.headers.get("Black").unwrap_or("Unknown");
        format!("{} vs {} - {}", white, black, self.result())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_keeps_order() {
        let mut headers = Headers::default();
        headers.set("Event", "Test");
        headers.set("White", "Alice");
        headers.set("Event", "Renamed");
        headers.set("WhiteACPL", "12");

        let names: Vec<&str> = headers.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["Event", "White", "WhiteACPL"]);
        assert_eq!(headers.get("Event"), Some("Renamed"));
    }

    #[test]
    fn test_unknown_result_is_star() {
        let mut game = Game::default();
        assert_eq!(game.result(), "*");
        game.headers.set("Result", "0-1");
        assert_eq!(game.result(), "0-1");
        game.headers.set("Result", "junk");
        assert_eq!(game.result(), "*");
    }

    #[test]
    fn test_game_summary() {
        let mut game = Game::default();
        game.headers.set("White", "Alice");
        game.headers.set("Black", "Bob");
        game.headers.set("Result", "1-0");
        assert_eq!(game.summary(), "Alice vs Bob - 1-0");
    }
}
