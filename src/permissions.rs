use anyhow::Result;

/// Check Accessibility permission (needed by the Globe helper's event tap)
///
/// # Errors
/// Returns error if accessibility permission is denied (macOS only)
pub fn check_accessibility_permission() -> Result<()> {
    tracing::info!("checking accessibility permission");

    #[cfg(target_os = "macos")]
    {
        // Try to create a CGEventSource to test accessibility access
        let source = core_graphics::event_source::CGEventSource::new(
            core_graphics::event_source::CGEventSourceStateID::CombinedSessionState,
        );

        if source.is_err() {
            anyhow::bail!("accessibility permission denied - enable in System Settings > Privacy & Security > Accessibility");
        }

        tracing::info!("accessibility permission granted");
    }

    Ok(())
}

/// Check Input Monitoring permission (needed by the global keyboard hook)
///
/// # Errors
/// Returns error if Input Monitoring permission is denied (macOS only)
pub fn check_input_monitoring_permission() -> Result<()> {
    tracing::info!("checking input monitoring permission");

    #[cfg(target_os = "macos")]
    {
        use core_graphics::event::CGEvent;
        use core_graphics::event_source::{CGEventSource, CGEventSourceStateID};

        // Try to create a CGEventSource with HIDSystemState - requires Input Monitoring
        let source = CGEventSource::new(CGEventSourceStateID::HIDSystemState).map_err(|()| {
            anyhow::anyhow!(
                "Input Monitoring permission denied\n\n\
                Enable in: System Settings → Privacy & Security → Input Monitoring\n\
                Add and enable this app, then restart.\n"
            )
        })?;

        // Verify we can actually create events (tests full permission chain)
        CGEvent::new_keyboard_event(source, 0, true).map_err(|()| {
            anyhow::anyhow!(
                "Failed to create CGEvent - Input Monitoring may be restricted\n\n\
                Enable in: System Settings → Privacy & Security → Input Monitoring\n"
            )
        })?;

        tracing::info!("input monitoring permission granted");
    }

    Ok(())
}

/// Check the permissions the hotkey engine needs
///
/// Accessibility is only required when the Globe helper may be used.
///
/// # Errors
/// Returns error if any permission check fails
pub fn request_hotkey_permissions(globe_enabled: bool) -> Result<()> {
    tracing::info!(globe_enabled, "checking hotkey permissions");

    check_input_monitoring_permission()?;
    if globe_enabled {
        check_accessibility_permission()?;
    }

    tracing::info!("all permissions checked");
    Ok(())
}
