//! Database row types matching `migrations/0001_init.sql`.
//! Decimals are stored as TEXT and parsed on read.

#[derive(Debug, sqlx::FromRow)]
pub struct WalletRow {
    pub wallet_address: String,
    pub alias: String,
}

#[derive(Debug, sqlx::FromRow)]
pub struct TokenRow {
    pub token_address: String,
    pub name: String,
    pub symbol: String,
}

#[derive(Debug, sqlx::FromRow)]
pub struct BalanceHistoryRow {
    pub wallet_address: String,
    pub token_address: String,
    pub balance: String,
    pub value: String,
}
