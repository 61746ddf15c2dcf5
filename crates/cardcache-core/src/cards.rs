//! Card image naming for the trainer's deck.
//!
//! Each card is an image at `cards/<code>.png`, where the code is the rank
//! followed by the suit letter: `AS`, `10H`, `QD`. These are not in the asset
//! manifest; the proxy caches each one the first time it is requested.

/// Card ranks, ace first
pub const RANKS: [&str; 13] = [
    "A", "2", "3", "4", "5", "6", "7", "8", "9", "10", "J", "Q", "K",
];

/// Spades, hearts, diamonds, clubs
pub const SUITS: [char; 4] = ['S', 'H', 'D', 'C'];

/// Directory the card images live in, relative to the app scope
const CARD_DIR: &str = "cards";

/// All 52 card codes, suit by suit
pub fn card_codes() -> Vec<String> {
    SUITS
        .iter()
        .flat_map(|suit| RANKS.iter().map(move |rank| format!("{}{}", rank, suit)))
        .collect()
}

/// Relative path of a card's image
pub fn card_path(code: &str) -> String {
    format!("./{}/{}.png", CARD_DIR, code)
}

/// Whether `code` names a card in the deck
pub fn is_card_code(code: &str) -> bool {
    let Some(suit) = code.chars().last() else {
        return false;
    };
    let rank = &code[..code.len() - suit.len_utf8()];
    SUITS.contains(&suit) && RANKS.contains(&rank)
}
