fn main() {
    // The ESP-IDF build system is only wanted when cross-compiling for the
    // Xtensa chip; build scripts run on the host, so gate on TARGET.
    if let Ok(target) = std::env::var("TARGET") {
        if target.contains("xtensa") {
            embuild::espidf::sysenv::output();
        }
    }
}
