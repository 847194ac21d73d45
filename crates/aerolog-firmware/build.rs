//! Wi-Fi credentials come from a `.env` file next to this crate so they never
//! land in the repository. Only `AEROLOG_*` keys are forwarded.

fn main() {
    println!("cargo:rustc-link-arg=-Tlinkall.x");
    println!("cargo:rerun-if-changed=.env");

    match dotenvy::dotenv_iter() {
        Ok(vars) => {
            for (key, value) in vars.flatten() {
                if key.starts_with("AEROLOG_") {
                    println!("cargo:rustc-env={key}={value}");
                }
            }
        }
        Err(_) => println!("cargo:warning=no .env found, Wi-Fi will stay down"),
    }
}
