//! `lvlab init` command: download and verify cloud images.

use clap::Args;
use lvlab_core::config::ImageDecl;
use lvlab_core::image::CloudImage;
use lvlab_runtime::ImageAcquirer;

use super::Lab;

#[derive(Args)]
pub struct InitArgs {
    /// Only these images (default: every declared image)
    pub images: Vec<String>,
}

pub async fn execute(args: InitArgs, lab: &Lab) -> Result<(), Box<dyn std::error::Error>> {
    for name in &args.images {
        if lab.manifest.find_image(name).is_none() {
            return Err(format!("Image {name} is not declared in the manifest").into());
        }
    }

    let acquirer = ImageAcquirer::new(lab.runner());
    let mut errors: Vec<String> = Vec::new();

    for decl in selected(&lab.manifest.images, &args.images) {
        if let Err(e) = init_one(&acquirer, decl, lab).await {
            tracing::error!(image = %decl.name, error = %e, "Image not ready");
            errors.push(format!("{}: {e}", decl.name));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(format!("{} image(s) failed:\n{}", errors.len(), errors.join("\n")).into())
    }
}

/// Declared images to initialise: all of them, or only those named.
fn selected<'a>(images: &'a [ImageDecl], names: &'a [String]) -> impl Iterator<Item = &'a ImageDecl> {
    images
        .iter()
        .filter(move |decl| names.is_empty() || names.contains(&decl.name))
}

async fn init_one(
    acquirer: &ImageAcquirer<'_>,
    decl: &ImageDecl,
    lab: &Lab,
) -> Result<(), Box<dyn std::error::Error>> {
    let image = CloudImage::resolve(decl, &lab.env)?;
    let report = acquirer.acquire(&image).await?;

    let verification = if report.already_verified {
        "previously verified"
    } else if report.checksum_verified {
        "checksum verified"
    } else {
        "no checksum configured"
    };
    println!(
        "{}: {} ({} file(s) downloaded, {verification})",
        image.name,
        image.image_path.display(),
        report.downloaded.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(name: &str) -> ImageDecl {
        ImageDecl {
            name: name.to_string(),
            ..ImageDecl::default()
        }
    }

    #[test]
    fn test_selected_defaults_to_every_image() {
        let images = vec![image("fedora40"), image("debian12")];
        let names: Vec<&str> = selected(&images, &[]).map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["fedora40", "debian12"]);
    }

    #[test]
    fn test_selected_filters_by_name() {
        let images = vec![image("fedora40"), image("debian12")];
        let wanted = vec!["debian12".to_string()];
        let names: Vec<&str> = selected(&images, &wanted).map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["debian12"]);
    }
}
