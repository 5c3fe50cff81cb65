//! Ready made prescriptions

use crate::error::Result;
use crate::index::MaterialTable;
use crate::surface::Surface;
use crate::trace::OpticalSystem;

/// Glass table of the sample lenses (d-line indices)
pub fn glasses() -> MaterialTable {
    MaterialTable::new()
        .insert("N-BK7", 1.5168)
        .insert("F2", 1.62004)
        .insert("N-SF5", 1.67271)
}

/// Concave parabolic mirror of vertex radius `-radius` focusing a
/// collimated beam at `radius/2` in front of it
pub fn paraboloid(radius: f64, semi_diameter: f64) -> Result<OpticalSystem> {
    OpticalSystem::new(vec![
        Surface::object(f64::INFINITY),
        Surface::mirror(-radius, -0.5 * radius)
            .with_conic(-1.)
            .with_semi_diameter(semi_diameter),
        Surface::image(),
    ])
}

/// Concave ellipsoidal mirror imaging its near focus, `object` mm in front
/// of the vertex, onto its far focus `image` mm in front of it
pub fn ellipsoid(object: f64, image: f64, semi_diameter: f64) -> Result<OpticalSystem> {
    let e = (object - image) / (object + image);
    OpticalSystem::new(vec![
        Surface::object(object),
        Surface::mirror(-2. * object * image / (object + image), -image)
            .with_conic(-e * e)
            .with_semi_diameter(semi_diameter),
        Surface::image(),
    ])
}

/// F/5 N-BK7 biconvex singlet behind a 10mm stop
pub fn singlet() -> Result<OpticalSystem> {
    Ok(OpticalSystem::new(vec![
        Surface::object(f64::INFINITY),
        Surface::stop(10., 5.),
        Surface::standard(50., 5.)
            .with_material("N-BK7")
            .with_semi_diameter(12.),
        Surface::standard(-50., 47.5).with_semi_diameter(12.),
        Surface::image(),
    ])?
    .with_index(glasses()))
}

/// Same singlet with the stop 20mm behind it
pub fn rear_stop_singlet() -> Result<OpticalSystem> {
    Ok(OpticalSystem::new(vec![
        Surface::object(f64::INFINITY),
        Surface::standard(50., 5.)
            .with_material("N-BK7")
            .with_semi_diameter(12.),
        Surface::standard(-50., 20.).with_semi_diameter(12.),
        Surface::stop(6., 27.5),
        Surface::image(),
    ])?
    .with_index(glasses()))
}

/// Stop followed by a 2mm field aperture 100mm away
pub fn blocked() -> Result<OpticalSystem> {
    OpticalSystem::new(vec![
        Surface::object(f64::INFINITY),
        Surface::stop(10., 100.),
        Surface::plane(10.).with_semi_diameter(2.),
        Surface::image(),
    ])
}
