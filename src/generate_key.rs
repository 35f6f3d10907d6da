// generate_key.rs
// Utility to generate fresh secrets for a deployment

#[path = "services/encryption.rs"]
mod encryption;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use encryption::TokenCipher;
use rand::{rngs::OsRng, RngCore};

fn main() {
    println!("Generating new secrets...\n");

    let encryption_key = TokenCipher::generate_key();

    let mut jwt_bytes = [0u8; 48];
    OsRng.fill_bytes(&mut jwt_bytes);
    let jwt_secret = URL_SAFE_NO_PAD.encode(jwt_bytes);

    println!("Add these to your .env file:");
    println!("─────────────────────────────────────────────────");
    println!("JWT_SECRET={}", jwt_secret);
    println!("ENCRYPTION_MASTER_KEY={}", encryption_key);
    println!("─────────────────────────────────────────────────");
    println!("\nIMPORTANT:");
    println!("  • Keep these values secure and never commit them to version control");
    println!("  • Rotating JWT_SECRET signs every user out");
    println!("  • Losing ENCRYPTION_MASTER_KEY makes stored provider tokens unreadable");
}
