fn main() {
    // The default device configuration is embedded with `include_str!`.
    println!("cargo:rerun-if-changed=configuration.json");

    #[cfg(feature = "espidf")]
    embuild::espidf::sysenv::output();
}
