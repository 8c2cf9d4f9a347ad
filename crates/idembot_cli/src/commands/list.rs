use idembot::RuleRegistry;

/// Print the rules a run would use.
pub fn handle_ls(registry: &RuleRegistry) {
    println!("Rules:");
    for name in registry.names() {
        println!(" * {name}");
    }
}
