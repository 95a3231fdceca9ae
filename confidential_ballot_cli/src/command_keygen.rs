use confidential_ballot::{generate_keypair, Principal};

pub fn command_keygen() {
    let (secret, public) = generate_keypair();

    println!("secret-key: {}", hex::encode(secret.to_bytes()));
    println!("principal:  {}", Principal::from_public_key(&public));
}
