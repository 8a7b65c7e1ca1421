/// Example program to print the loaded configuration and preset
///
/// Run with: cargo run -p postfx-config --example print_config

fn main() {
    let config = postfx_config::PostFxConfig::load();

    println!("=== PostFX Configuration ===\n");

    println!("Chain Settings:");
    println!("  Preset: {:?}", config.chain.preset);
    println!("  Smooth: {}", config.chain.smooth);
    println!("  Max Passes: {}", config.chain.max_passes);
    println!(
        "  Max Input: {}x{}",
        config.chain.max_input_width, config.chain.max_input_height
    );
    println!("  Texel Alignment: {}", config.chain.texel_alignment);
    println!("  Pow2 Targets: {}", config.chain.pow2_targets);
    println!();

    println!("Demo Settings:");
    println!("  Output: {:?}", config.demo.output);
    println!("  Frames: {}", config.demo.frames);
    println!(
        "  Input: {}x{}",
        config.demo.input_width, config.demo.input_height
    );
    println!(
        "  Viewport: {}x{}",
        config.demo.viewport_width, config.demo.viewport_height
    );
    println!();

    if let Some(path) = &config.chain.preset {
        match postfx_config::ShaderPreset::load_from_file(path) {
            Ok(preset) => {
                println!("Preset {:?}:", path);
                for (index, pass) in preset.passes.iter().enumerate() {
                    let last = index + 1 == preset.passes.len();
                    println!(
                        "  pass {}: {:?} scale={:?} filter={:?} wrap={:?}",
                        index,
                        pass.shader,
                        pass.scale_rules(last),
                        pass.filter,
                        pass.wrap
                    );
                }
                for lut in &preset.luts {
                    println!("  lut {}: {:?}", lut.id, lut.path);
                }
                for var in &preset.variables {
                    println!("  variable {}: {:?} @ {:#x}", var.id, var.kind, var.address);
                }
                println!();
            }
            Err(e) => eprintln!("Failed to load preset: {}", e),
        }
    }

    match toml::to_string_pretty(&config) {
        Ok(toml_str) => {
            println!("=== Serialized Configuration ===");
            println!("{}", toml_str);
        }
        Err(e) => {
            eprintln!("Failed to serialize config: {}", e);
        }
    }
}
