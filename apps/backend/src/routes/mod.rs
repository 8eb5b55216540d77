pub mod auth;
pub mod decks;
pub mod flashcards;
pub mod review;
pub mod users;
